//! Snapshots of one path in each of the three worlds.
//!
//! - [`LocalStorageItem`]: what the local filesystem says
//! - [`RemoteStorageItem`]: what the repository says, or that we have not
//!   asked yet
//! - [`DbStorageItem`]: what the metadata store recorded at the last
//!   agreement
//!
//! All three are immutable once built.

use crate::context::SyncContext;
use crate::error::Result;
use bridge_traits::{FileMetadata, RemoteObject};
use core_store::MappedObject;
use std::path::PathBuf;

// ============================================================================
// Local
// ============================================================================

#[derive(Debug, Clone)]
pub struct LocalStorageItem {
    root: PathBuf,
    relative_path: String,
    metadata: Option<FileMetadata>,
}

impl LocalStorageItem {
    /// Stat the entry; a missing entry yields an absent item.
    pub async fn load(ctx: &SyncContext, relative_path: &str) -> Result<Self> {
        let full = ctx.local_full_path(relative_path);
        let metadata = match ctx.fs.metadata(&full).await {
            Ok(metadata) => Some(metadata),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            root: ctx.local_root.clone(),
            relative_path: relative_path.to_string(),
            metadata,
        })
    }

    pub fn absent(root: PathBuf, relative_path: impl Into<String>) -> Self {
        Self {
            root,
            relative_path: relative_path.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(
        root: PathBuf,
        relative_path: impl Into<String>,
        metadata: FileMetadata,
    ) -> Self {
        Self {
            root,
            relative_path: relative_path.into(),
            metadata: Some(metadata),
        }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub fn full_path(&self) -> PathBuf {
        self.relative_path
            .split('/')
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    pub fn exists(&self) -> bool {
        self.metadata.is_some()
    }

    pub fn is_directory(&self) -> bool {
        self.metadata.as_ref().is_some_and(|m| m.is_directory)
    }

    pub fn size(&self) -> Option<u64> {
        self.metadata.as_ref().map(|m| m.size)
    }

    pub fn modified_at(&self) -> Option<i64> {
        self.metadata.as_ref().and_then(|m| m.modified_at)
    }

    pub fn created_at(&self) -> Option<i64> {
        self.metadata.as_ref().and_then(|m| m.created_at)
    }
}

// ============================================================================
// Remote
// ============================================================================

/// Whether the remote side of a path has been looked up.
#[derive(Debug, Clone)]
pub enum RemoteState {
    /// Not looked up yet.
    Unknown,
    /// Confirmed not to exist.
    Absent,
    Present(RemoteObject),
}

#[derive(Debug, Clone)]
pub struct RemoteStorageItem {
    root: String,
    relative_path: String,
    state: RemoteState,
}

impl RemoteStorageItem {
    pub fn unknown(root: impl Into<String>, relative_path: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            relative_path: relative_path.into(),
            state: RemoteState::Unknown,
        }
    }

    pub fn absent(root: impl Into<String>, relative_path: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            relative_path: relative_path.into(),
            state: RemoteState::Absent,
        }
    }

    pub fn present(
        root: impl Into<String>,
        relative_path: impl Into<String>,
        object: RemoteObject,
    ) -> Self {
        Self {
            root: root.into(),
            relative_path: relative_path.into(),
            state: RemoteState::Present(object),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub fn full_path(&self) -> String {
        if self.root == "/" {
            format!("/{}", self.relative_path)
        } else {
            format!("{}/{}", self.root, self.relative_path)
        }
    }

    pub fn state(&self) -> &RemoteState {
        &self.state
    }

    pub fn is_known(&self) -> bool {
        !matches!(self.state, RemoteState::Unknown)
    }

    pub fn exists(&self) -> bool {
        matches!(self.state, RemoteState::Present(_))
    }

    pub fn object(&self) -> Option<&RemoteObject> {
        match &self.state {
            RemoteState::Present(object) => Some(object),
            _ => None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.object().map(RemoteObject::id)
    }

    pub fn is_folder(&self) -> bool {
        self.object().is_some_and(RemoteObject::is_folder)
    }

    pub fn last_modified_millis(&self) -> Option<i64> {
        self.object()
            .and_then(RemoteObject::last_modified)
            .map(|t| t.timestamp_millis())
    }

    /// User holding a checkout on the document, if any.
    pub fn checked_out_by(&self) -> Option<&str> {
        match self.object() {
            Some(RemoteObject::Document(doc)) => doc.checked_out_by.as_deref(),
            _ => None,
        }
    }
}

// ============================================================================
// Database
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct DbStorageItem {
    record: Option<MappedObject>,
}

impl DbStorageItem {
    pub fn new(record: Option<MappedObject>) -> Self {
        Self { record }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn exists(&self) -> bool {
        self.record.is_some()
    }

    pub fn record(&self) -> Option<&MappedObject> {
        self.record.as_ref()
    }

    pub fn is_folder(&self) -> bool {
        self.record.as_ref().is_some_and(MappedObject::is_folder)
    }

    pub fn local_path(&self) -> Option<&str> {
        self.record.as_ref().map(MappedObject::local_path)
    }

    pub fn remote_path(&self) -> Option<&str> {
        self.record.as_ref().map(MappedObject::remote_path)
    }

    pub fn remote_id(&self) -> Option<&str> {
        self.record.as_ref().map(MappedObject::remote_id)
    }

    pub fn remote_modified(&self) -> Option<i64> {
        self.record.as_ref().and_then(MappedObject::remote_modified)
    }

    pub fn checksum(&self) -> Option<&str> {
        self.record
            .as_ref()
            .and_then(MappedObject::as_file)
            .and_then(|f| f.checksum.as_deref())
    }
}
