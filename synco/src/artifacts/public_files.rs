//! Unencrypted files, synchronized one by one by the receiver.
//!
//! Only the index is encrypted. The files themselves are fetched straight
//! from the web directory, so every exported directory must live inside it.

use crate::fs::walker::{slash_path, total_size, walk_directory, WalkOptions};
use crate::meta::{FileSet, FileSetPayload, PublicFileEntry, PublicFilesIndex, BASE_PLACEHOLDER};
use crate::session::TransferSession;
use crate::utils::errors::{Result, SyncoError};
use crate::utils::human_bytes;
use std::path::{Path, PathBuf};
use tracing::info;

pub fn index_artifact_name(file_set: &str) -> String {
    format!("{file_set}.index.json.enc")
}

/// A directory exported as public files.
#[derive(Debug, Clone)]
pub struct PublicDir {
    pub name: String,
    pub dir: PathBuf,
}

/// Index `public.dir` and record it as a `PublicFiles` set.
///
/// Index keys are relative to `root`, which is where the receiver recreates
/// them. URIs are relative to `web_dir`.
pub async fn export_public_files(
    session: &mut TransferSession,
    public: &PublicDir,
    root: &Path,
    web_dir: &Path,
) -> Result<FileSet> {
    let key_prefix = relative_prefix(&public.dir, root)?;
    let uri_prefix = relative_prefix(&public.dir, web_dir)?;

    let dir = public.dir.clone();
    let options = WalkOptions {
        exclude_dirs: vec![session.work_dir()?.to_path_buf()],
        ..Default::default()
    };
    let files = tokio::task::spawn_blocking(move || walk_directory(&dir, &options))
        .await
        .map_err(|e| SyncoError::Framework(format!("directory walk failed: {e}")))??;

    let mut index = PublicFilesIndex::new();
    for file in &files {
        index.insert(
            join_slash(&key_prefix, &file.relative_path),
            PublicFileEntry {
                size_bytes: file.size,
                mtime: file.mtime,
                public_uri: format!(
                    "{BASE_PLACEHOLDER}/{}",
                    join_slash(&uri_prefix, &file.relative_path)
                ),
            },
        );
    }

    let index_name = index_artifact_name(&public.name);
    session.encrypt_bytes_to_file(&index_name, &serde_json::to_vec(&index)?)?;

    let size_bytes = total_size(&files);
    info!(
        "Indexed {} public files ({}) in {}",
        files.len(),
        human_bytes(size_bytes),
        public.dir.display()
    );

    let file_set = FileSet {
        name: public.name.clone(),
        payload: FileSetPayload::PublicFiles {
            index_file_name: index_name,
            size_bytes,
        },
    };
    session.add_file_set(file_set.clone())?;
    Ok(file_set)
}

fn relative_prefix(dir: &Path, base: &Path) -> Result<String> {
    let relative = dir.strip_prefix(base).map_err(|_| {
        SyncoError::Framework(format!(
            "public directory {} is not inside {}",
            dir.display(),
            base.display()
        ))
    })?;
    Ok(slash_path(relative))
}

fn join_slash(prefix: &str, rest: &str) -> String {
    if prefix.is_empty() {
        rest.to_string()
    } else {
        format!("{prefix}/{rest}")
    }
}
