use super::{Framework, ServeContext};
use crate::artifacts::{
    export_database, export_private_files, export_public_files, PrivateDir, PublicDir,
};
use crate::config::AppConfig;
use crate::session::TransferSession;
use crate::utils::errors::{Result, SyncoError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use synco_dump::SqliteSource;
use tracing::info;

/// Application described by the `[app]` section of the config file.
#[derive(Debug, Clone)]
pub struct ConfiguredApp {
    app: Option<AppConfig>,
}

impl ConfiguredApp {
    pub fn new(app: Option<AppConfig>) -> Self {
        Self { app }
    }

    fn app(&self) -> Result<&AppConfig> {
        self.app
            .as_ref()
            .ok_or_else(|| SyncoError::Framework("no [app] section configured".to_string()))
    }
}

/// File set name for a directory: its last path component.
fn dir_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "files".to_string())
}

#[async_trait]
impl Framework for ConfiguredApp {
    fn name(&self) -> &str {
        "configured"
    }

    fn detect(&self, _root: &Path) -> bool {
        self.app.is_some()
    }

    fn web_dir(&self, root: &Path) -> PathBuf {
        match &self.app {
            Some(app) => root.join(&app.web_dir),
            None => root.to_path_buf(),
        }
    }

    async fn serve(&self, session: &mut TransferSession, ctx: &ServeContext) -> Result<()> {
        let app = self.app()?;
        let root = &ctx.root;
        let web_dir = self.web_dir(root);
        info!("Exporting application {}", app.name);

        if let Some(database) = &app.database {
            let path = root.join(database);
            let source = SqliteSource::open(&path)?;
            let options = ctx.config.pipeline_options(app.tables.clone());
            export_database(session, source, options).await?;
        }

        let public_dirs: Vec<PathBuf> = app.public_dirs.iter().map(|d| root.join(d)).collect();
        for dir in &public_dirs {
            let public = PublicDir {
                name: dir_name(dir),
                dir: dir.clone(),
            };
            export_public_files(session, &public, root, &web_dir).await?;
        }

        for dir in &app.private_dirs {
            let dir = root.join(dir);
            let private = PrivateDir {
                name: dir_name(&dir),
                dir,
            };
            export_private_files(session, &private, root, &public_dirs).await?;
        }

        Ok(())
    }
}
