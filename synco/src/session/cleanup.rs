use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Removes a session directory at most once.
#[derive(Debug)]
pub struct WorkDirCleanup {
    dir: PathBuf,
    done: AtomicBool,
}

impl WorkDirCleanup {
    pub fn new(dir: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            dir: dir.into(),
            done: AtomicBool::new(false),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns whether this call removed the directory. Later calls and an
    /// already missing directory are no-ops.
    pub fn run(&self) -> io::Result<bool> {
        if self.done.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Run the cleanup once `cancel` fires.
    pub fn run_on_cancel(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let cleanup = self.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            info!("Cleaning up {}", cleanup.dir.display());
            let task = cleanup.clone();
            match tokio::task::spawn_blocking(move || task.run()).await {
                Ok(Ok(_)) => info!("Cleanup completed"),
                Ok(Err(e)) => warn!("Cleanup of {} failed: {}", cleanup.dir.display(), e),
                Err(e) => warn!("Cleanup task failed: {}", e),
            }
        })
    }
}
