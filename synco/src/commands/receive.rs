use crate::config::{Config, DEFAULT_CONFIG_FILE};
use crate::receive::base_url::all_candidates;
use crate::receive::{ReceiveOptions, ReceiveSession, SyncReport};
use crate::utils::errors::{Result, SyncoError};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct ReceiveArgs {
    pub identifier: String,
    pub password: String,
    /// Tried after the configured hosts
    pub base_urls: Vec<String>,
    /// File set names or labels; falls back to `receive.only`
    pub only: Vec<String>,
    /// Add the detected base URL to the config file
    pub remember: bool,
    pub config_path: Option<PathBuf>,
}

/// Locate the session and pull the selected file sets.
pub async fn run_receive(config: &mut Config, args: &ReceiveArgs) -> Result<Vec<(String, SyncReport)>> {
    let mut session = ReceiveSession::new(ReceiveOptions::from_config(
        &args.identifier,
        &args.password,
        &config.receive,
    ))?;

    let candidates = all_candidates(&config.receive.hosts, &args.base_urls);
    if candidates.is_empty() {
        return Err(SyncoError::Config(
            "no base URL; pass --base-url or add hosts to the [receive] config".to_string(),
        ));
    }
    let found = session.detect_base_url(&candidates).await?;

    if args.remember && !config.receive.hosts.contains(&found) {
        let path = args
            .config_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        config.receive.hosts.push(found.clone());
        config.save(&path)?;
        info!("Remembered {} in {}", found, path.display());
    }

    let meta = session.fetch_ready_meta().await?;
    let only = if args.only.is_empty() {
        &config.receive.only
    } else {
        &args.only
    };
    let reports = session.receive(&meta, only).await?;

    info!("All downloaded to {}", session.work_dir().display());
    info!("Stop synco serve on the source with Ctrl+C when you are done");
    Ok(reports)
}
