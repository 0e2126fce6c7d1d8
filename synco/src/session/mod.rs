//! Source side of a transfer.
//!
//! A [`TransferSession`] owns the session directory inside the web root,
//! the manifest and the cipher. Every artifact goes through
//! [`TransferSession::encrypt_to_file`] and is then recorded with
//! [`TransferSession::add_file_set`], which re-persists the manifest.

mod cleanup;

pub use cleanup::WorkDirCleanup;

use crate::api::StaticServer;
use crate::crypto::{ArtifactCipher, EncryptingSink};
use crate::meta::{FileSet, Meta, SessionState, META_FILE_NAME};
use crate::utils::errors::{Result, SyncoError};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Prefix of session directory names.
pub const SESSION_DIR_PREFIX: &str = "ts-";
const TEMP_SUFFIX: &str = ".tmp";
/// Plain text copy of the current state, for scripts polling the session.
const STATE_FILE_NAME: &str = "state";

pub fn random_identifier() -> String {
    random_alphanumeric(7)
}

pub fn random_password() -> String {
    random_alphanumeric(30)
}

fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub identifier: String,
    pub password: String,
    /// Start the built-in static server on this address.
    pub listen: Option<String>,
    /// Skip removing the session directory on shutdown.
    pub keep_files: bool,
    pub scrypt_work_factor: Option<u8>,
}

pub struct TransferSession {
    identifier: String,
    password: String,
    cipher: ArtifactCipher,
    meta: Meta,
    work_dir: Option<PathBuf>,
    listen: Option<String>,
    keep_files: bool,
    cancel: CancellationToken,
    server: Option<StaticServer>,
    cleanup: Option<JoinHandle<()>>,
}

impl TransferSession {
    /// `cancel` ends the session: it stops the server and, unless files are
    /// kept, removes the session directory.
    pub fn new(options: SessionOptions, cancel: CancellationToken) -> Result<Self> {
        if options.password.is_empty() {
            return Err(SyncoError::Config("empty password".to_string()));
        }
        if options.identifier.is_empty() {
            return Err(SyncoError::Config("empty identifier".to_string()));
        }

        Ok(Self {
            identifier: format!("{SESSION_DIR_PREFIX}{}", options.identifier),
            cipher: ArtifactCipher::new(&options.password)
                .with_work_factor(options.scrypt_work_factor),
            password: options.password,
            meta: Meta::default(),
            work_dir: None,
            listen: options.listen.filter(|l| !l.is_empty()),
            keep_files: options.keep_files,
            cancel,
            server: None,
            cleanup: None,
        })
    }

    /// Directory name of the session, `ts-<identifier>`.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn cipher(&self) -> &ArtifactCipher {
        &self.cipher
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(StaticServer::local_addr)
    }

    pub fn work_dir(&self) -> Result<&Path> {
        self.work_dir
            .as_deref()
            .ok_or_else(|| SyncoError::Config("session has no working directory yet".to_string()))
    }

    fn path_in_work_dir(&self, name: &str) -> Result<PathBuf> {
        Ok(self.work_dir()?.join(name))
    }

    /// Create the session directory inside `web_dir`, start serving if
    /// requested and move to `Initializing`.
    pub async fn with_framework_and_web_directory(
        &mut self,
        framework_name: &str,
        web_dir: &Path,
    ) -> Result<()> {
        let work_dir = web_dir.join(&self.identifier);
        std::fs::create_dir_all(&work_dir)?;
        info!("Session directory: {}", work_dir.display());
        self.work_dir = Some(work_dir.clone());

        if self.keep_files {
            info!("Keeping {} after shutdown; remove it manually", work_dir.display());
        } else {
            let cleanup = WorkDirCleanup::new(work_dir);
            self.cleanup = Some(cleanup.run_on_cancel(self.cancel.clone()));
        }

        if let Some(listen) = &self.listen {
            let server = StaticServer::start(listen, web_dir, self.cancel.clone()).await?;
            self.server = Some(server);
        }

        self.meta.framework_name = framework_name.to_string();
        self.meta.state = SessionState::Initializing;
        self.persist_meta()
    }

    /// Write the manifest to a temporary file, close it and rename it over
    /// the final name so readers never see a partial manifest.
    pub fn persist_meta(&self) -> Result<()> {
        let json = serde_json::to_vec(&self.meta)?;
        let temp_name = format!("{META_FILE_NAME}{TEMP_SUFFIX}");

        let mut sink = self.encrypt_to_file(&temp_name)?;
        sink.write_all(&json)?;
        sink.finish()?;

        std::fs::rename(
            self.path_in_work_dir(&temp_name)?,
            self.path_in_work_dir(META_FILE_NAME)?,
        )?;
        std::fs::write(
            self.path_in_work_dir(STATE_FILE_NAME)?,
            self.meta.state.to_string(),
        )?;
        debug!(state = %self.meta.state, file_sets = self.meta.file_sets.len(), "Manifest persisted");
        Ok(())
    }

    /// Open an encrypted artifact in the session directory.
    pub fn encrypt_to_file(&self, name: &str) -> Result<EncryptingSink> {
        self.cipher.open_encrypting_sink(&self.path_in_work_dir(name)?)
    }

    pub fn encrypt_bytes_to_file(&self, name: &str, contents: &[u8]) -> Result<u64> {
        let mut sink = self.encrypt_to_file(name)?;
        sink.write_all(contents)?;
        sink.finish()
    }

    /// Record a finished artifact and persist the manifest.
    pub fn add_file_set(&mut self, file_set: FileSet) -> Result<()> {
        info!("Added file set {}", file_set.label());
        self.meta.push_file_set(file_set)?;
        self.persist_meta()
    }

    pub fn mark_ready(&mut self) -> Result<()> {
        self.meta.state = SessionState::Ready;
        self.persist_meta()
    }

    /// Cancel the session and wait for cleanup and server shutdown.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(cleanup) = self.cleanup.take() {
            if let Err(e) = cleanup.await {
                warn!("Cleanup task failed: {}", e);
            }
        }
        if let Some(server) = self.server.take() {
            server.stopped().await;
        }
    }
}
