//! Session manifest and public file index.

use crate::utils::errors::{Result, SyncoError};
use crate::utils::human_bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// File name of the encrypted manifest inside the session directory.
pub const META_FILE_NAME: &str = "meta.json.enc";

/// Placeholder at the start of a public URI, resolved by the receiver
/// relative to the session directory.
pub const BASE_PLACEHOLDER: &str = "<BASE>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Created,
    Initializing,
    Ready,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Created => "Created",
            SessionState::Initializing => "Initializing",
            SessionState::Ready => "Ready",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    pub state: SessionState,
    pub framework_name: String,
    pub file_sets: Vec<FileSet>,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            state: SessionState::Created,
            framework_name: String::new(),
            file_sets: Vec::new(),
        }
    }
}

impl Meta {
    /// Append a file set. Names must be unique within a session.
    pub fn push_file_set(&mut self, file_set: FileSet) -> Result<()> {
        if self.file_set(&file_set.name).is_some() {
            return Err(SyncoError::DuplicateFileSet(file_set.name));
        }
        self.file_sets.push(file_set);
        Ok(())
    }

    pub fn file_set(&self, name: &str) -> Option<&FileSet> {
        self.file_sets.iter().find(|fs| fs.name == name)
    }

    /// Look up by label (`"name (Type: size)"`) or plain name.
    pub fn file_set_by_label(&self, label: &str) -> Option<&FileSet> {
        let name = label.split_once(" (").map_or(label, |(name, _)| name);
        self.file_set(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSet {
    pub name: String,
    #[serde(flatten)]
    pub payload: FileSetPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FileSetPayload {
    #[serde(rename_all = "camelCase")]
    MysqlDump { file_name: String, size_bytes: u64 },

    #[serde(rename_all = "camelCase")]
    PublicFiles {
        index_file_name: String,
        size_bytes: u64,
    },

    #[serde(rename_all = "camelCase")]
    PrivateEncryptedFiles {
        tar_uri: String,
        size_bytes: u64,
        relative_base_path: String,
    },
}

impl FileSet {
    pub fn type_name(&self) -> &'static str {
        match self.payload {
            FileSetPayload::MysqlDump { .. } => "MysqlDump",
            FileSetPayload::PublicFiles { .. } => "PublicFiles",
            FileSetPayload::PrivateEncryptedFiles { .. } => "PrivateEncryptedFiles",
        }
    }

    pub fn size_bytes(&self) -> u64 {
        match self.payload {
            FileSetPayload::MysqlDump { size_bytes, .. }
            | FileSetPayload::PublicFiles { size_bytes, .. }
            | FileSetPayload::PrivateEncryptedFiles { size_bytes, .. } => size_bytes,
        }
    }

    pub fn label(&self) -> String {
        format!(
            "{} ({}: {})",
            self.name,
            self.type_name(),
            human_bytes(self.size_bytes())
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicFileEntry {
    pub size_bytes: u64,
    /// Modification time, seconds since the Unix epoch.
    pub mtime: i64,
    pub public_uri: String,
}

/// Logical relative path to file metadata. Only used to decide whether a
/// local copy is current, never for integrity.
pub type PublicFilesIndex = BTreeMap<String, PublicFileEntry>;

/// Replace the base placeholder with the parent of the session directory.
pub fn resolve_public_uri(uri: &str) -> String {
    match uri.strip_prefix(BASE_PLACEHOLDER) {
        Some(rest) => format!("..{rest}"),
        None => uri.to_string(),
    }
}
