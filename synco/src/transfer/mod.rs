//! Transfer progress reporting.

pub mod progress;
pub mod progress_stream;

pub use progress::{logging_progress, ProgressCallback};
pub use progress_stream::ProgressStream;
