use super::{Framework, ServeContext};
use crate::artifacts::{export_public_files, PublicDir};
use crate::session::TransferSession;
use crate::utils::errors::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

const PUBLIC_DIR: &str = "public";

/// A directory with a `public/` document root and nothing else to export.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticSite;

#[async_trait]
impl Framework for StaticSite {
    fn name(&self) -> &str {
        "static"
    }

    fn detect(&self, root: &Path) -> bool {
        root.join(PUBLIC_DIR).is_dir()
    }

    fn web_dir(&self, root: &Path) -> PathBuf {
        root.join(PUBLIC_DIR)
    }

    async fn serve(&self, session: &mut TransferSession, ctx: &ServeContext) -> Result<()> {
        let web_dir = self.web_dir(&ctx.root);
        let public = PublicDir {
            name: PUBLIC_DIR.to_string(),
            dir: web_dir.clone(),
        };
        export_public_files(session, &public, &ctx.root, &web_dir).await?;
        Ok(())
    }
}
