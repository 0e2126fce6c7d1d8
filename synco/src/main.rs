//! Synco - main entry point

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use synco::commands::{self, DumpFormat, ReceiveArgs};
use synco::{config::Config, daemon, utils};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (default: .synco.toml if present)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Export the application in this directory and serve it until Ctrl+C
    Serve {
        /// Session identifier (random when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Encryption password (random when omitted)
        #[arg(long)]
        password: Option<String>,

        /// Start a static HTTP server on this address, e.g. 0.0.0.0:8080
        #[arg(long)]
        listen: Option<String>,

        /// Keep the session directory after shutdown
        #[arg(long)]
        keep: bool,

        /// Dump every table and row, ignoring table rules
        #[arg(long)]
        all: bool,

        /// Application root
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Download a session served by `synco serve`
    Receive {
        identifier: String,
        password: String,

        /// Base URL of the serving web server; may be given several times
        #[arg(long = "base-url")]
        base_urls: Vec<String>,

        /// Only these file sets (name or label); may be given several times
        #[arg(long)]
        only: Vec<String>,

        /// Store the detected base URL in the config file
        #[arg(long)]
        remember: bool,
    },

    /// Dump a SQLite database to a file
    Dump {
        #[arg(long)]
        database: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(long, value_enum, default_value_t = DumpFormat::Sql)]
        format: DumpFormat,

        /// Rows per query (0 = whole table)
        #[arg(long)]
        chunk_rows: Option<u64>,

        #[command(flatten)]
        convert: ConvertFlags,
    },

    /// Convert a binary dump into SQL
    Convert {
        input: PathBuf,
        output: PathBuf,

        #[command(flatten)]
        convert: ConvertFlags,
    },
}

#[derive(ClapArgs, Debug)]
struct ConvertFlags {
    /// Only convert these tables; may be given several times
    #[arg(long = "tables")]
    tables: Vec<String>,

    /// Statement size in bytes before a new REPLACE INTO is started
    #[arg(long)]
    batch_size: Option<usize>,

    /// Leave out DROP/CREATE statements
    #[arg(long)]
    skip_create: bool,
}

impl ConvertFlags {
    fn apply(&self, config: &mut Config) {
        if !self.tables.is_empty() {
            config.dump.tables = self.tables.clone();
        }
        if let Some(size) = self.batch_size {
            config.dump.batch_size = size;
        }
        if self.skip_create {
            config.dump.skip_create = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    config.apply_env()?;

    // Initialize logging
    let log_level = cli.log_level.clone().unwrap_or_else(|| config.log.level.clone());
    utils::logger::init(&log_level)?;

    tracing::info!("synco v{}", env!("CARGO_PKG_VERSION"));

    let cancel = CancellationToken::new();
    let signals = daemon::spawn_signal_listener(cancel.clone());

    let result = run(cli, config, cancel.clone()).await;

    cancel.cancel();
    let _ = signals.await;
    result
}

async fn run(cli: Cli, mut config: Config, cancel: CancellationToken) -> Result<()> {
    match cli.command {
        Command::Serve {
            id,
            password,
            listen,
            keep,
            all,
            root,
        } => {
            if id.is_some() {
                config.serve.identifier = id;
            }
            if password.is_some() {
                config.serve.password = password;
            }
            if listen.is_some() {
                config.serve.listen = listen;
            }
            if let Some(root) = root {
                config.serve.root = root;
            }
            config.serve.keep_files |= keep;
            config.serve.dump_all |= all;
            commands::run_serve(&config, cancel).await?;
        }
        Command::Receive {
            identifier,
            password,
            base_urls,
            only,
            remember,
        } => {
            let args = ReceiveArgs {
                identifier,
                password,
                base_urls,
                only,
                remember,
                config_path: cli.config,
            };
            let reports = commands::run_receive(&mut config, &args)
                .await
                .context("receive failed")?;
            for (name, report) in reports {
                tracing::info!(
                    "{}: {} downloaded, {} unchanged, {} failed",
                    name,
                    report.downloaded,
                    report.skipped,
                    report.failed
                );
            }
        }
        Command::Dump {
            database,
            output,
            format,
            chunk_rows,
            convert,
        } => {
            convert.apply(&mut config);
            if let Some(rows) = chunk_rows {
                config.dump.chunk_rows = rows;
            }
            commands::run_dump(&config, &database, &output, format, cancel)
                .await
                .with_context(|| format!("dumping {}", database.display()))?;
        }
        Command::Convert {
            input,
            output,
            convert,
        } => {
            convert.apply(&mut config);
            commands::run_convert(&config, input, output).await?;
        }
    }
    Ok(())
}
