//! Directory traversal for exported file sets.

use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Follow symbolic links to directories
    pub follow_links: bool,

    /// Directories to leave out, e.g. ones already exported elsewhere
    pub exclude_dirs: Vec<PathBuf>,
}

/// A regular file found during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Path relative to the root, always `/`-separated
    pub relative_path: String,

    /// File size in bytes (of the target for symlinks)
    pub size: u64,

    /// Modification time in seconds since the Unix epoch
    pub mtime: i64,
}

impl FileInfo {
    /// Symlinks are resolved to their target. Broken links and links to
    /// directories yield `None`.
    fn from_entry(entry: &DirEntry, root: &Path) -> io::Result<Option<Self>> {
        let path = entry.path().to_path_buf();
        let metadata = if entry.path_is_symlink() {
            match std::fs::metadata(&path) {
                Ok(resolved) if resolved.is_dir() => return Ok(None),
                Ok(resolved) => resolved,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping broken symlink");
                    return Ok(None);
                }
            }
        } else {
            entry.metadata().map_err(io::Error::from)?
        };

        let relative_path = slash_path(path.strip_prefix(root).unwrap_or(&path));

        Ok(Some(Self {
            relative_path,
            size: metadata.len(),
            mtime: mtime_secs(&metadata),
            path,
        }))
    }
}

/// Render a relative path with `/` separators on every platform.
pub fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Modification time of `metadata` in whole seconds since the epoch.
pub fn mtime_secs(metadata: &std::fs::Metadata) -> i64 {
    match metadata.modified() {
        Ok(t) => match t.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(e) => -(e.duration().as_secs() as i64),
        },
        Err(_) => 0,
    }
}

/// Walk a directory tree and collect all regular files, sorted by path.
pub fn walk_directory(root: &Path, options: &WalkOptions) -> io::Result<Vec<FileInfo>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !options.exclude_dirs.iter().any(|dir| entry.path() == dir.as_path()));

    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_dir() {
            continue;
        }
        if let Some(info) = FileInfo::from_entry(&entry, root)? {
            files.push(info);
        }
    }

    Ok(files)
}

/// Total size of the given files in bytes.
pub fn total_size(files: &[FileInfo]) -> u64 {
    files.iter().map(|f| f.size).sum()
}
