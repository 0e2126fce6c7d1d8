//! Receiving side of a transfer.
//!
//! A [`ReceiveSession`] locates a session on a web server, reads its
//! manifest and pulls the selected file sets into a local work directory.
//! Public files are compared by size and modification time, so running a
//! receive again only downloads what changed.

pub mod base_url;

use crate::config::ReceiveConfig;
use crate::crypto::{stream_error, ArtifactCipher};
use crate::fs::walker::mtime_secs;
use crate::meta::{
    resolve_public_uri, FileSet, FileSetPayload, Meta, PublicFileEntry, PublicFilesIndex,
    SessionState, META_FILE_NAME,
};
use crate::session::SESSION_DIR_PREFIX;
use crate::transfer::{logging_progress, ProgressCallback, ProgressStream};
use crate::utils::errors::{Result, SyncoError};
use crate::utils::human_bytes;
use filetime::FileTime;
use futures_util::StreamExt;
use reqwest::StatusCode;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ReceiveOptions {
    /// Session identifier, with or without the `ts-` prefix
    pub identifier: String,
    pub password: String,
    pub work_dir: PathBuf,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl ReceiveOptions {
    pub fn from_config(identifier: &str, password: &str, config: &ReceiveConfig) -> Self {
        Self {
            identifier: identifier.to_string(),
            password: password.to_string(),
            work_dir: config.work_dir.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }
}

/// Outcome of synchronizing one file set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes: u64,
}

pub struct ReceiveSession {
    identifier: String,
    base_url: Option<String>,
    work_dir: PathBuf,
    cipher: ArtifactCipher,
    client: reqwest::Client,
}

impl ReceiveSession {
    pub fn new(options: ReceiveOptions) -> Result<Self> {
        if options.password.is_empty() {
            return Err(SyncoError::Config("empty password".to_string()));
        }
        if options.identifier.is_empty() {
            return Err(SyncoError::Config("empty identifier".to_string()));
        }
        let identifier = if options.identifier.starts_with(SESSION_DIR_PREFIX) {
            options.identifier
        } else {
            format!("{SESSION_DIR_PREFIX}{}", options.identifier)
        };

        // Redirects are not followed so an http URL never silently turns
        // into a different host or scheme.
        let client = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .timeout(options.request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        std::fs::create_dir_all(&options.work_dir)?;

        Ok(Self {
            identifier,
            base_url: None,
            work_dir: options.work_dir,
            cipher: ArtifactCipher::new(&options.password),
            client,
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn set_base_url(&mut self, base_url: impl Into<String>) {
        let base_url = base_url.into();
        self.base_url = Some(base_url.trim_end_matches('/').to_string());
    }

    /// `<base>/<identifier>/<name>`
    pub fn artifact_url(&self, name: &str) -> Result<String> {
        let base = self
            .base_url
            .as_deref()
            .ok_or_else(|| SyncoError::Config("no base URL set".to_string()))?;
        Ok(format!("{base}/{}/{name}", self.identifier))
    }

    fn public_url(&self, public_uri: &str) -> Result<String> {
        let uri = resolve_public_uri(public_uri);
        if uri.starts_with("http://") || uri.starts_with("https://") {
            Ok(uri)
        } else {
            self.artifact_url(&uri)
        }
    }

    async fn get(&self, url: String) -> Result<reqwest::Response> {
        debug!("Fetching {}", url);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SyncoError::ArtifactNotFound(url));
        }
        if !status.is_success() {
            return Err(SyncoError::Transport {
                url,
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    /// Check that the manifest exists under the current base URL.
    pub async fn probe_meta(&self) -> Result<()> {
        self.get(self.artifact_url(META_FILE_NAME)?).await.map(drop)
    }

    /// Try `candidates` in order and keep the first one serving this
    /// session. Missing manifests, unreachable hosts and redirects move on
    /// to the next candidate; any other failure aborts.
    pub async fn detect_base_url(&mut self, candidates: &[String]) -> Result<String> {
        for candidate in candidates {
            self.set_base_url(candidate.as_str());
            match self.probe_meta().await {
                Ok(()) => {
                    info!("Found session {} at {}", self.identifier, candidate);
                    return Ok(candidate.clone());
                }
                Err(e) if e.is_soft_not_found() => debug!("Not at {}: {}", candidate, e),
                Err(SyncoError::Transport { status, .. }) if (300..400).contains(&status) => {
                    debug!("Not following redirect from {} ({})", candidate, status)
                }
                Err(e) => {
                    self.base_url = None;
                    return Err(e);
                }
            }
        }
        self.base_url = None;
        Err(SyncoError::ArtifactNotFound(format!(
            "{}/{} (tried {} base URLs)",
            self.identifier,
            META_FILE_NAME,
            candidates.len()
        )))
    }

    async fn fetch_decrypted(&self, name: &str) -> Result<Vec<u8>> {
        let sealed = self.get(self.artifact_url(name)?).await?.bytes().await?;
        let cipher = self.cipher.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || cipher.decrypt_bytes(&sealed, &name))
            .await
            .map_err(join_error)?
    }

    pub async fn fetch_meta(&self) -> Result<Meta> {
        let json = self.fetch_decrypted(META_FILE_NAME).await?;
        Ok(serde_json::from_slice(&json)?)
    }

    /// Fetch the manifest and insist that the serving side has finished.
    pub async fn fetch_ready_meta(&self) -> Result<Meta> {
        let meta = self.fetch_meta().await?;
        info!("Framework on server: {}", meta.framework_name);
        if meta.state != SessionState::Ready {
            return Err(SyncoError::NotReady {
                state: meta.state.to_string(),
            });
        }
        Ok(meta)
    }

    /// Synchronize the file sets selected by `only` (names or labels; all
    /// when empty), in manifest order.
    pub async fn receive(&self, meta: &Meta, only: &[String]) -> Result<Vec<(String, SyncReport)>> {
        let selected: Vec<&FileSet> = if only.is_empty() {
            meta.file_sets.iter().collect()
        } else {
            only.iter()
                .map(|label| {
                    meta.file_set_by_label(label)
                        .ok_or_else(|| SyncoError::Config(format!("unknown file set {label:?}")))
                })
                .collect::<Result<_>>()?
        };

        let mut reports = Vec::with_capacity(selected.len());
        for file_set in selected {
            info!("Downloading {}", file_set.label());
            let report = self.sync_file_set(file_set).await?;
            reports.push((file_set.name.clone(), report));
        }
        Ok(reports)
    }

    pub async fn sync_file_set(&self, file_set: &FileSet) -> Result<SyncReport> {
        match &file_set.payload {
            FileSetPayload::MysqlDump {
                file_name,
                size_bytes,
            } => {
                let dest = self.work_dir.join(format!("{}.sql", file_set.name));
                let bytes = self.download_decrypted(file_name, *size_bytes, &dest).await?;
                info!("Wrote {} ({})", dest.display(), human_bytes(bytes));
                Ok(SyncReport {
                    downloaded: 1,
                    bytes,
                    ..Default::default()
                })
            }
            FileSetPayload::PublicFiles {
                index_file_name, ..
            } => self.sync_public_files(index_file_name).await,
            FileSetPayload::PrivateEncryptedFiles {
                tar_uri,
                size_bytes,
                relative_base_path,
            } => {
                let relative = safe_relative_path(relative_base_path).ok_or_else(|| {
                    SyncoError::Archive(format!(
                        "{relative_base_path:?} leaves the work directory"
                    ))
                })?;
                let dest = self.work_dir.join(relative);
                self.unpack_private_files(tar_uri, *size_bytes, &dest).await
            }
        }
    }

    async fn download_decrypted(&self, name: &str, size: u64, dest: &Path) -> Result<u64> {
        let response = self.get(self.artifact_url(name)?).await?;
        let reader = body_reader(response, logging_progress(name, size));
        let cipher = self.cipher.clone();
        let name = name.to_string();
        let dest = dest.to_path_buf();

        tokio::task::spawn_blocking(move || -> Result<u64> {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let part = part_path(&dest);
            let result = (|| -> Result<u64> {
                let mut plain = cipher.decrypt_reader(reader, &name)?;
                let mut file = BufWriter::new(File::create(&part)?);
                let written = io::copy(&mut plain, &mut file).map_err(|e| stream_error(e, &name))?;
                file.flush()?;
                Ok(written)
            })();
            match result {
                Ok(written) => {
                    std::fs::rename(&part, &dest)?;
                    Ok(written)
                }
                Err(e) => {
                    let _ = std::fs::remove_file(&part);
                    Err(e)
                }
            }
        })
        .await
        .map_err(join_error)?
    }

    async fn sync_public_files(&self, index_name: &str) -> Result<SyncReport> {
        let json = self.fetch_decrypted(index_name).await?;
        let index: PublicFilesIndex = serde_json::from_slice(&json)?;
        let mut report = SyncReport::default();

        for (key, entry) in &index {
            let Some(relative) = safe_relative_path(key) else {
                warn!("Skipping {}: path leaves the work directory", key);
                report.failed += 1;
                continue;
            };
            let local = self.work_dir.join(relative);
            if is_current(&local, entry) {
                report.skipped += 1;
                continue;
            }
            let progress = logging_progress(key.as_str(), entry.size_bytes);
            match self.download_public_file(entry, &local, progress).await {
                Ok(bytes) => {
                    debug!(file = %key, bytes, "Downloaded");
                    report.downloaded += 1;
                    report.bytes += bytes;
                }
                Err(e) => {
                    warn!("Failed to download {}: {}", key, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Public files: {} downloaded ({}), {} unchanged, {} failed",
            report.downloaded,
            human_bytes(report.bytes),
            report.skipped,
            report.failed
        );
        Ok(report)
    }

    async fn download_public_file(
        &self,
        entry: &PublicFileEntry,
        local: &Path,
        progress: ProgressCallback,
    ) -> Result<u64> {
        let response = self.get(self.public_url(&entry.public_uri)?).await?;
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let part = part_path(local);
        let mut file = tokio::fs::File::create(&part).await?;
        let mut body = ProgressStream::new(Box::pin(response.bytes_stream()), progress);
        while let Some(chunk) = body.next().await {
            file.write_all(&chunk?).await?;
        }
        let written = body.bytes_transferred();
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&part, local).await?;
        filetime::set_file_mtime(local, FileTime::from_unix_time(entry.mtime, 0))?;
        Ok(written)
    }

    async fn unpack_private_files(&self, tar_uri: &str, size: u64, dest: &Path) -> Result<SyncReport> {
        let response = self.get(self.artifact_url(tar_uri)?).await?;
        let reader = body_reader(response, logging_progress(tar_uri, size));
        let cipher = self.cipher.clone();
        let name = tar_uri.to_string();
        let dest = dest.to_path_buf();

        tokio::task::spawn_blocking(move || -> Result<()> {
            std::fs::create_dir_all(&dest)?;
            let plain = cipher.decrypt_reader(reader, &name)?;
            let mut archive = tar::Archive::new(plain);
            archive.set_preserve_mtime(true);
            archive.unpack(&dest).map_err(|e| archive_error(e, &name))?;
            // Read to the end so the final cipher chunk is authenticated.
            let mut rest = archive.into_inner();
            io::copy(&mut rest, &mut io::sink()).map_err(|e| stream_error(e, &name))?;
            info!("Unpacked {} into {}", name, dest.display());
            Ok(())
        })
        .await
        .map_err(join_error)??;

        Ok(SyncReport {
            downloaded: 1,
            bytes: size,
            ..Default::default()
        })
    }
}

/// Blocking reader over a response body that reports progress.
fn body_reader(
    response: reqwest::Response,
    progress: ProgressCallback,
) -> SyncIoBridge<impl AsyncRead + Unpin + Send + 'static> {
    let stream = ProgressStream::new(Box::pin(response.bytes_stream()), progress)
        .map(|chunk| chunk.map_err(io::Error::other));
    SyncIoBridge::new(StreamReader::new(stream))
}

fn archive_error(e: io::Error, artifact: &str) -> SyncoError {
    if e.kind() == io::ErrorKind::InvalidData {
        stream_error(e, artifact)
    } else {
        SyncoError::Archive(format!("{artifact}: {e}"))
    }
}

fn join_error(e: tokio::task::JoinError) -> SyncoError {
    SyncoError::Io(io::Error::other(e))
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Local copy matches the index entry by size and modification time.
fn is_current(local: &Path, entry: &PublicFileEntry) -> bool {
    match std::fs::metadata(local) {
        Ok(metadata) => {
            metadata.is_file()
                && metadata.len() == entry.size_bytes
                && mtime_secs(&metadata) == entry.mtime
        }
        Err(_) => false,
    }
}

/// `key` as a relative path that stays inside the work directory.
fn safe_relative_path(key: &str) -> Option<PathBuf> {
    let path = Path::new(key);
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}
