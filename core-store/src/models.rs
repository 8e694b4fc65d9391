//! Records held by the metadata store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a record describes a file or a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    File,
    Folder,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::File => "file",
            ObjectKind::Folder => "folder",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation whose failures are counted per path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Download,
    Upload,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Download => "download",
            OperationKind::Upload => "upload",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reconciled file. Timestamps are Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedFile {
    pub local_path: String,
    pub remote_path: String,
    pub remote_id: String,
    /// Lower-case hex SHA-256 of the content last reconciled.
    pub checksum: Option<String>,
    pub local_modified: Option<i64>,
    pub remote_modified: Option<i64>,
    pub size: Option<u64>,
}

impl MappedFile {
    pub fn new(
        local_path: impl Into<String>,
        remote_path: impl Into<String>,
        remote_id: impl Into<String>,
    ) -> Self {
        Self {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            remote_id: remote_id.into(),
            checksum: None,
            local_modified: None,
            remote_modified: None,
            size: None,
        }
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn with_local_state(mut self, modified: Option<i64>, size: u64) -> Self {
        self.local_modified = modified;
        self.size = Some(size);
        self
    }

    pub fn with_remote_modified(mut self, modified: Option<i64>) -> Self {
        self.remote_modified = modified;
        self
    }
}

/// A reconciled folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedFolder {
    pub local_path: String,
    pub remote_path: String,
    pub remote_id: String,
    pub remote_modified: Option<i64>,
}

impl MappedFolder {
    pub fn new(
        local_path: impl Into<String>,
        remote_path: impl Into<String>,
        remote_id: impl Into<String>,
    ) -> Self {
        Self {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            remote_id: remote_id.into(),
            remote_modified: None,
        }
    }
}

/// Either kind of record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MappedObject {
    File(MappedFile),
    Folder(MappedFolder),
}

impl MappedObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            MappedObject::File(_) => ObjectKind::File,
            MappedObject::Folder(_) => ObjectKind::Folder,
        }
    }

    pub fn local_path(&self) -> &str {
        match self {
            MappedObject::File(f) => &f.local_path,
            MappedObject::Folder(f) => &f.local_path,
        }
    }

    pub fn remote_path(&self) -> &str {
        match self {
            MappedObject::File(f) => &f.remote_path,
            MappedObject::Folder(f) => &f.remote_path,
        }
    }

    pub fn remote_id(&self) -> &str {
        match self {
            MappedObject::File(f) => &f.remote_id,
            MappedObject::Folder(f) => &f.remote_id,
        }
    }

    pub fn remote_modified(&self) -> Option<i64> {
        match self {
            MappedObject::File(f) => f.remote_modified,
            MappedObject::Folder(f) => f.remote_modified,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, MappedObject::Folder(_))
    }

    pub fn as_file(&self) -> Option<&MappedFile> {
        match self {
            MappedObject::File(f) => Some(f),
            MappedObject::Folder(_) => None,
        }
    }
}
