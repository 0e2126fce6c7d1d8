//! Byte-level progress tracking for artifact transfers.

use crate::utils::human_bytes;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Progress of one transfer
#[derive(Debug, Clone)]
pub struct TransferProgress {
    /// Declared size; 0 when unknown
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    pub bytes_per_second: u64,
    pub percent_complete: f64,
}

impl TransferProgress {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            transferred_bytes: 0,
            bytes_per_second: 0,
            percent_complete: 0.0,
        }
    }

    pub fn update(&mut self, transferred_bytes: u64, elapsed_secs: f64) {
        self.transferred_bytes = transferred_bytes;
        self.percent_complete = if self.total_bytes > 0 {
            (transferred_bytes as f64 / self.total_bytes as f64 * 100.0).min(100.0)
        } else {
            0.0
        };
        if elapsed_secs > 0.0 {
            self.bytes_per_second = (transferred_bytes as f64 / elapsed_secs) as u64;
        }
    }

    pub fn is_complete(&self) -> bool {
        self.transferred_bytes >= self.total_bytes
    }
}

/// Callback receiving the running byte count
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Callback that logs progress of `label` against `total_bytes`.
pub fn logging_progress(label: impl Into<String>, total_bytes: u64) -> ProgressCallback {
    let label = label.into();
    let start = Instant::now();
    Arc::new(move |transferred| {
        let mut progress = TransferProgress::new(total_bytes);
        progress.update(transferred, start.elapsed().as_secs_f64());
        if progress.is_complete() {
            info!(
                artifact = %label,
                total = %human_bytes(progress.transferred_bytes),
                speed = %format!("{}/s", human_bytes(progress.bytes_per_second)),
                "Transfer complete"
            );
        } else {
            info!(
                artifact = %label,
                transferred = %human_bytes(progress.transferred_bytes),
                total = %human_bytes(progress.total_bytes),
                percent = format_args!("{:.1}", progress.percent_complete),
                speed = %format!("{}/s", human_bytes(progress.bytes_per_second)),
                "Transfer progress"
            );
        }
    })
}
