use crate::config::Config;
use crate::utils::errors::{Result, SyncoError};
use crate::utils::human_bytes;
use clap::ValueEnum;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use synco_dump::{run_pipeline, DumpOptions, Dumper, FlushUnit, SqlConverter, SqlWriter, SqliteSource};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum DumpFormat {
    /// Executable SQL
    #[default]
    Sql,
    /// The framed binary dump stream, for `synco convert` later
    Binary,
}

/// Dump a local SQLite database to `output`.
pub async fn run_dump(
    config: &Config,
    database: &Path,
    output: &Path,
    format: DumpFormat,
    cancel: CancellationToken,
) -> Result<()> {
    let source = SqliteSource::open(database)?;
    let policy = config.table_policy();
    let file = File::create(output)?;

    match format {
        DumpFormat::Sql => {
            let options = config.pipeline_options(policy);
            let (report, writer) =
                run_pipeline(source, SqlWriter::new(BufWriter::new(file)), options, cancel).await?;
            let written = writer.bytes_written();
            writer
                .into_inner()
                .into_inner()
                .map_err(|e| SyncoError::Io(e.into_error()))?
                .sync_all()?;
            info!(
                "Wrote {} tables, {} rows as SQL to {} ({})",
                report.dump.tables,
                report.dump.rows,
                output.display(),
                human_bytes(written)
            );
        }
        DumpFormat::Binary => {
            let dumper = Dumper::new(
                source,
                DumpOptions {
                    policy,
                    dump_all: config.serve.dump_all,
                    chunk_rows: config.dump.chunk_rows,
                },
            );
            let summary = tokio::task::spawn_blocking(move || dumper.dump(file, &cancel))
                .await
                .map_err(|e| SyncoError::Io(std::io::Error::other(e)))??;
            info!(
                "Wrote {} tables, {} rows as binary dump to {}",
                summary.tables,
                summary.rows,
                output.display()
            );
        }
    }
    Ok(())
}

/// Convert a binary dump file into SQL.
pub async fn run_convert(config: &Config, input: PathBuf, output: PathBuf) -> Result<()> {
    let converter = SqlConverter::new(config.convert_options());
    let summary = tokio::task::spawn_blocking(move || -> Result<_> {
        let reader = BufReader::new(File::open(&input)?);
        let mut out = BufWriter::new(File::create(&output)?);
        let mut sink = |unit: FlushUnit| -> synco_dump::Result<()> {
            out.write_all(&unit.sql)?;
            Ok(())
        };
        let summary = converter.convert(reader, &mut sink)?;
        out.flush()?;
        info!(
            "Converted {} tables ({} rows, {} skipped) from {} into {}",
            summary.tables_converted,
            summary.rows_converted,
            summary.tables_skipped,
            input.display(),
            output.display()
        );
        Ok(summary)
    })
    .await
    .map_err(|e| SyncoError::Io(std::io::Error::other(e)))??;
    info!("{} flush units written", summary.flushes);
    Ok(())
}
