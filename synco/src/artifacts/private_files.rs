use crate::fs::walker::{slash_path, walk_directory, WalkOptions};
use crate::meta::{FileSet, FileSetPayload};
use crate::session::TransferSession;
use crate::utils::errors::{Result, SyncoError};
use crate::utils::human_bytes;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub fn archive_artifact_name(file_set: &str) -> String {
    format!("encrypted-resources-{file_set}")
}

/// A directory exported as one encrypted tar archive.
#[derive(Debug, Clone)]
pub struct PrivateDir {
    pub name: String,
    pub dir: PathBuf,
}

/// Archive `private.dir` into an encrypted tar and record it.
///
/// Directories in `skip` (usually the public ones) are left out of the
/// archive. The receiver unpacks it under the directory's path relative to
/// `root`.
pub async fn export_private_files(
    session: &mut TransferSession,
    private: &PrivateDir,
    root: &Path,
    skip: &[PathBuf],
) -> Result<FileSet> {
    let relative_base_path = private
        .dir
        .strip_prefix(root)
        .map(slash_path)
        .map_err(|_| {
            SyncoError::Framework(format!(
                "private directory {} is not inside {}",
                private.dir.display(),
                root.display()
            ))
        })?;

    let tar_uri = archive_artifact_name(&private.name);
    let sink = session.encrypt_to_file(&tar_uri)?;
    let dir = private.dir.clone();
    let mut exclude_dirs = skip.to_vec();
    exclude_dirs.push(session.work_dir()?.to_path_buf());
    let options = WalkOptions {
        exclude_dirs,
        ..Default::default()
    };

    let (count, size_bytes) = tokio::task::spawn_blocking(move || -> Result<(usize, u64)> {
        let files = walk_directory(&dir, &options)?;
        let mut builder = tar::Builder::new(sink);
        for file in &files {
            debug!(path = %file.relative_path, "Archiving");
            builder
                .append_path_with_name(&file.path, &file.relative_path)
                .map_err(|e| SyncoError::Archive(format!("{}: {e}", file.path.display())))?;
        }
        let sink = builder
            .into_inner()
            .map_err(|e| SyncoError::Archive(e.to_string()))?;
        Ok((files.len(), sink.finish()?))
    })
    .await
    .map_err(|e| SyncoError::Archive(format!("archive task failed: {e}")))??;

    info!(
        "Archived {} private files from {} ({})",
        count,
        private.dir.display(),
        human_bytes(size_bytes)
    );

    let file_set = FileSet {
        name: private.name.clone(),
        payload: FileSetPayload::PrivateEncryptedFiles {
            tar_uri,
            size_bytes,
            relative_base_path,
        },
    };
    session.add_file_set(file_set.clone())?;
    Ok(file_set)
}
