//! Configuration management.
//!
//! Loads configuration from a TOML file with environment variable overrides.
//! Command line flags are applied on top by the binary.

use crate::utils::errors::{Result, SyncoError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use synco_dump::pipeline::{DEFAULT_HIGH_WATERMARK, DEFAULT_QUEUE_CAPACITY};
use synco_dump::{ConvertOptions, DumpOptions, PipelineOptions, TablePolicy};

/// Looked up in the working directory when no config path is given.
pub const DEFAULT_CONFIG_FILE: &str = ".synco.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub serve: ServeConfig,
    #[serde(default)]
    pub receive: ReceiveConfig,
    #[serde(default)]
    pub dump: DumpConfig,
    #[serde(default)]
    pub log: LogConfig,
    /// Describes the application to export; enables the configured framework.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<AppConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServeConfig {
    /// Session identifier; random when unset
    #[serde(default)]
    pub identifier: Option<String>,

    /// Session password; random when unset
    #[serde(default)]
    pub password: Option<String>,

    /// Address for the built-in static file server, e.g. `0.0.0.0:8080`.
    /// When unset the files are left for an existing web server.
    #[serde(default)]
    pub listen: Option<String>,

    /// Keep the session directory after shutdown
    #[serde(default)]
    pub keep_files: bool,

    /// Dump every table and row, ignoring table rules
    #[serde(default)]
    pub dump_all: bool,

    /// Application root to inspect
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// log2 of the scrypt work factor; library default when unset
    #[serde(default)]
    pub scrypt_work_factor: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveConfig {
    /// Where received files are written
    #[serde(default = "default_root")]
    pub work_dir: PathBuf,

    /// Base URLs tried before the ones given on the command line
    #[serde(default)]
    pub hosts: Vec<String>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// File set names or labels to fetch; empty fetches all
    #[serde(default)]
    pub only: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpConfig {
    /// Statement size in bytes before a new REPLACE INTO is started
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Rows per source query (0 = whole table at once)
    #[serde(default)]
    pub chunk_rows: u64,

    /// Tables to convert; empty converts all
    #[serde(default)]
    pub tables: Vec<String>,

    #[serde(default)]
    pub skip_create: bool,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_high_watermark")]
    pub high_watermark: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,

    /// Document root of the web server, relative to the application root
    #[serde(default = "default_web_dir")]
    pub web_dir: PathBuf,

    /// SQLite database to export
    #[serde(default)]
    pub database: Option<PathBuf>,

    /// Directories exported unencrypted and synchronized file by file
    #[serde(default)]
    pub public_dirs: Vec<PathBuf>,

    /// Directories exported as one encrypted archive each
    #[serde(default)]
    pub private_dirs: Vec<PathBuf>,

    /// Per-table dump rules
    #[serde(default)]
    pub tables: TablePolicy,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_connect_timeout() -> u64 {
    1
}

fn default_request_timeout() -> u64 {
    3600
}

fn default_batch_size() -> usize {
    synco_dump::convert::DEFAULT_BATCH_SIZE
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_high_watermark() -> usize {
    DEFAULT_HIGH_WATERMARK
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_app_name() -> String {
    "app".to_string()
}

fn default_web_dir() -> PathBuf {
    PathBuf::from("public")
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            identifier: None,
            password: None,
            listen: None,
            keep_files: false,
            dump_all: false,
            root: default_root(),
            scrypt_work_factor: None,
        }
    }
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        Self {
            work_dir: default_root(),
            hosts: Vec::new(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            only: Vec::new(),
        }
    }
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            chunk_rows: 0,
            tables: Vec::new(),
            skip_create: false,
            queue_capacity: default_queue_capacity(),
            high_watermark: default_high_watermark(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SyncoError::Config(format!("{}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| SyncoError::Config(format!("{}: {e}", path.display())))
    }

    /// Explicit path, else `.synco.toml` if present, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.exists() {
                    Self::from_file(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| SyncoError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `SYNCO_*` variables from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(level) = lookup("SYNCO_LOG_LEVEL") {
            self.log.level = level;
        }
        if let Some(listen) = lookup("SYNCO_LISTEN") {
            self.serve.listen = Some(listen).filter(|l| !l.is_empty());
        }
        if let Some(size) = lookup("SYNCO_BATCH_SIZE") {
            self.dump.batch_size = size
                .parse()
                .map_err(|_| SyncoError::Config(format!("SYNCO_BATCH_SIZE: invalid number {size:?}")))?;
        }
        if let Some(dir) = lookup("SYNCO_WORK_DIR") {
            self.receive.work_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    /// Table rules of the configured application, if any.
    pub fn table_policy(&self) -> TablePolicy {
        self.app
            .as_ref()
            .map(|app| app.tables.clone())
            .unwrap_or_default()
    }

    pub fn convert_options(&self) -> ConvertOptions {
        ConvertOptions {
            tables: self.dump.tables.clone(),
            batch_size: self.dump.batch_size,
            skip_create: self.dump.skip_create,
        }
    }

    pub fn pipeline_options(&self, policy: TablePolicy) -> PipelineOptions {
        PipelineOptions {
            dump: DumpOptions {
                policy,
                dump_all: self.serve.dump_all,
                chunk_rows: self.dump.chunk_rows,
            },
            convert: self.convert_options(),
            queue_capacity: self.dump.queue_capacity,
            high_watermark: self.dump.high_watermark,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use synco_dump::TableRule;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.dump.batch_size, 1_000_000);
        assert_eq!(config.dump.queue_capacity, 100);
        assert_eq!(config.dump.high_watermark, 50);
        assert_eq!(config.receive.connect_timeout_secs, 1);
        assert_eq!(config.receive.request_timeout_secs, 3600);
        assert_eq!(config.log.level, "info");
        assert!(config.app.is_none());
    }

    #[test]
    fn test_app_section_with_table_rules() {
        let config: Config = toml::from_str(
            r#"
            [serve]
            listen = "127.0.0.1:8080"
            keep_files = true

            [app]
            name = "shop"
            database = "var/shop.db"
            public_dirs = ["public/media"]
            private_dirs = ["var/secrets"]

            [app.tables]
            sessions = { rule = "exclude" }
            logs = { rule = "exclude_rows", predicate = "level = 'debug'" }
            "#,
        )
        .unwrap();

        assert_eq!(config.serve.listen.as_deref(), Some("127.0.0.1:8080"));
        let app = config.app.as_ref().unwrap();
        assert_eq!(app.web_dir, PathBuf::from("public"));
        assert_eq!(app.private_dirs, vec![PathBuf::from("var/secrets")]);
        let policy = config.table_policy();
        assert_eq!(policy.rule("sessions"), &TableRule::Exclude);
        assert!(policy.row_filter("logs").is_some());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("SYNCO_LOG_LEVEL", "debug"),
            ("SYNCO_LISTEN", "0.0.0.0:9000"),
            ("SYNCO_BATCH_SIZE", "4096"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.serve.listen.as_deref(), Some("0.0.0.0:9000"));
        assert_eq!(config.pipeline_options(TablePolicy::new()).convert.batch_size, 4096);

        let bad: HashMap<&str, &str> = [("SYNCO_BATCH_SIZE", "lots")].into_iter().collect();
        assert!(config
            .apply_overrides(|k| bad.get(k).map(|v| v.to_string()))
            .is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("synco.toml");
        let mut config = Config::default();
        config.receive.hosts.push("https://example.com".to_string());
        config.save(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.receive.hosts, vec!["https://example.com"]);
    }
}
