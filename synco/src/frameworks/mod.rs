//! Application frameworks the serving side knows how to export.
//!
//! Frameworks are tried in registration order and the first one that
//! detects itself wins. Two frameworks matching the same layout is not an
//! error; the earlier registration is used.

mod configured;
mod static_site;

pub use configured::ConfiguredApp;
pub use static_site::StaticSite;

use crate::config::Config;
use crate::session::TransferSession;
use crate::utils::errors::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Everything a framework needs besides the session.
#[derive(Debug, Clone)]
pub struct ServeContext {
    /// Application root
    pub root: PathBuf,
    pub config: Config,
}

#[async_trait]
pub trait Framework: Send + Sync {
    fn name(&self) -> &str;

    fn detect(&self, root: &Path) -> bool;

    /// Document root of the web server that will host the session.
    fn web_dir(&self, root: &Path) -> PathBuf;

    /// Export the application's artifacts into `session`.
    async fn serve(&self, session: &mut TransferSession, ctx: &ServeContext) -> Result<()>;
}

#[derive(Default)]
pub struct FrameworkRegistry {
    frameworks: Vec<Box<dyn Framework>>,
}

impl FrameworkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in frameworks: the `[app]` config section, then a plain
    /// static site.
    pub fn with_defaults(config: &Config) -> Self {
        let mut registry = Self::new();
        registry.register(ConfiguredApp::new(config.app.clone()));
        registry.register(StaticSite);
        registry
    }

    pub fn register(&mut self, framework: impl Framework + 'static) {
        self.frameworks.push(Box::new(framework));
    }

    pub fn names(&self) -> Vec<&str> {
        self.frameworks.iter().map(|f| f.name()).collect()
    }

    pub fn detect(&self, root: &Path) -> Option<&dyn Framework> {
        self.frameworks
            .iter()
            .map(Box::as_ref)
            .find(|f| {
                debug!("Checking for {} framework", f.name());
                f.detect(root)
            })
    }
}
