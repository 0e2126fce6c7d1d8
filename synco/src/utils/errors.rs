//! Error types for sessions, artifacts and transfers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncoError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Wrong passphrase or corrupt ciphertext. Retrying the download will not help.
    #[error("Decryption failed for {artifact}: {message}. Check the password")]
    Decryption { artifact: String, message: String },

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Unexpected HTTP status {status} for {url}")]
    Transport { url: String, status: u16 },

    #[error("Session is not ready yet (state: {state}). Run receive again later")]
    NotReady { state: String },

    #[error("File set {0} already exists in this session")]
    DuplicateFileSet(String),

    #[error("Dump error: {0}")]
    Dump(#[from] synco_dump::DumpError),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Framework error: {0}")]
    Framework(String),
}

impl SyncoError {
    /// Missing artifacts and unreachable hosts; used to try the next base URL.
    pub fn is_soft_not_found(&self) -> bool {
        match self {
            SyncoError::ArtifactNotFound(_) => true,
            SyncoError::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncoError>;
