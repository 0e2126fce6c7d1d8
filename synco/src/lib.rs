//! Synco
//!
//! Exports a database and its files as an encrypted bundle that a client
//! pulls over plain HTTP, and re-synchronizes on later runs.

pub mod api;
pub mod artifacts;
pub mod commands;
pub mod config;
pub mod crypto;
pub mod daemon;
pub mod frameworks;
pub mod fs;
pub mod meta;
pub mod receive;
pub mod session;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use meta::{FileSet, FileSetPayload, Meta, SessionState};
pub use receive::ReceiveSession;
pub use session::TransferSession;
pub use utils::errors::{Result, SyncoError};
