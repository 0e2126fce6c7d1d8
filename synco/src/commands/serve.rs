use crate::config::Config;
use crate::frameworks::{FrameworkRegistry, ServeContext};
use crate::session::{random_identifier, random_password, SessionOptions, TransferSession};
use crate::utils::errors::{Result, SyncoError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Detect the application under `serve.root`, export it into a new session
/// and keep serving until `cancel` fires.
pub async fn run_serve(config: &Config, cancel: CancellationToken) -> Result<()> {
    let root = config.serve.root.clone();
    let registry = FrameworkRegistry::with_defaults(config);
    let framework = registry.detect(&root).ok_or_else(|| {
        SyncoError::Framework(format!(
            "no framework detected in {} (tried {})",
            root.display(),
            registry.names().join(", ")
        ))
    })?;
    info!("Found {} framework", framework.name());

    let options = SessionOptions {
        identifier: non_empty(config.serve.identifier.as_deref()).unwrap_or_else(random_identifier),
        password: non_empty(config.serve.password.as_deref()).unwrap_or_else(random_password),
        listen: config.serve.listen.clone(),
        keep_files: config.serve.keep_files,
        scrypt_work_factor: config.serve.scrypt_work_factor,
    };
    let mut session = TransferSession::new(options, cancel.clone())?;
    session
        .with_framework_and_web_directory(framework.name(), &framework.web_dir(&root))
        .await?;

    let ctx = ServeContext {
        root,
        config: config.clone(),
    };
    let exported = match framework.serve(&mut session, &ctx).await {
        Ok(()) => session.mark_ready(),
        Err(e) => Err(e),
    };
    if let Err(e) = exported {
        error!("Export failed: {}", e);
        session.shutdown().await;
        return Err(e);
    }

    info!("Session ready. On the receiving side run:");
    info!("    synco receive {} {}", session.identifier(), session.password());
    if let Some(addr) = session.server_addr() {
        info!("    with --base-url http://{}", addr);
    }
    info!("Press Ctrl+C when the transfer is done");

    cancel.cancelled().await;
    session.shutdown().await;
    Ok(())
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_serve_static_site_until_cancelled() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("public")).unwrap();
        std::fs::write(root.path().join("public/index.html"), b"<html>").unwrap();

        let mut config = Config::default();
        config.serve.root = root.path().to_path_buf();
        config.serve.identifier = Some("fixed".to_string());
        config.serve.scrypt_work_factor = Some(4);

        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let config = config.clone();
            let cancel = cancel.clone();
            async move { run_serve(&config, cancel).await }
        });

        let state_file = root.path().join("public/ts-fixed/state");
        let mut ready = false;
        for _ in 0..200 {
            if std::fs::read_to_string(&state_file).is_ok_and(|s| s == "Ready") {
                ready = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert!(ready, "session never became ready");

        cancel.cancel();
        task.await.unwrap().unwrap();
        assert!(!root.path().join("public/ts-fixed").exists());
        assert!(root.path().join("public/index.html").exists());
    }

    #[tokio::test]
    async fn test_no_framework_detected() {
        let root = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.serve.root = root.path().to_path_buf();
        let err = run_serve(&config, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SyncoError::Framework(_)));
    }
}
