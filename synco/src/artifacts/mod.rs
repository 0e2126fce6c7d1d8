//! Artifacts produced by the serving side.
//!
//! Each exporter writes its files through the session's cipher and then
//! appends one file set to the manifest.

pub mod database;
pub mod private_files;
pub mod public_files;

pub use database::{export_database, DB_DUMP_ARTIFACT, DB_DUMP_FILE_SET};
pub use private_files::{archive_artifact_name, export_private_files, PrivateDir};
pub use public_files::{export_public_files, index_artifact_name, PublicDir};
