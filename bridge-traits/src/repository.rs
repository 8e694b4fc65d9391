//! Remote document repository contract.
//!
//! The protocol client (session handling, wire format, authentication) lives
//! outside the sync core. It is consumed through [`RemoteRepository`], and
//! every object it returns is classified once, here, into the
//! [`RemoteObject`] sum type. Nothing deeper in the pipeline inspects raw
//! repository type names.
//!
//! Remote paths are absolute repository paths (`/Sites/docs/a/b.txt`).

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A folder in the remote repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFolder {
    pub id: String,
    pub name: String,
    pub path: String,
    pub parent_id: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// A document (file) in the remote repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub id: String,
    pub name: String,
    /// Full path of the document. Documents may be multi-filed remotely; the
    /// client reports the path under which the document was reached.
    pub path: String,
    pub parent_id: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_length: Option<u64>,
    /// User holding the private working copy, if the document is checked out.
    pub checked_out_by: Option<String>,
}

/// Every remote object, classified once at the protocol boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteObject {
    Folder(RemoteFolder),
    Document(RemoteDocument),
    /// Links, policies, relationships and any other type the engine does not
    /// synchronise.
    Unsupported {
        id: String,
        name: String,
        base_type: String,
    },
}

impl RemoteObject {
    pub fn id(&self) -> &str {
        match self {
            RemoteObject::Folder(f) => &f.id,
            RemoteObject::Document(d) => &d.id,
            RemoteObject::Unsupported { id, .. } => id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            RemoteObject::Folder(f) => &f.name,
            RemoteObject::Document(d) => &d.name,
            RemoteObject::Unsupported { name, .. } => name,
        }
    }

    /// Full repository path, when the object kind has one.
    pub fn path(&self) -> Option<&str> {
        match self {
            RemoteObject::Folder(f) => Some(&f.path),
            RemoteObject::Document(d) => Some(&d.path),
            RemoteObject::Unsupported { .. } => None,
        }
    }

    pub fn parent_id(&self) -> Option<&str> {
        match self {
            RemoteObject::Folder(f) => f.parent_id.as_deref(),
            RemoteObject::Document(d) => d.parent_id.as_deref(),
            RemoteObject::Unsupported { .. } => None,
        }
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        match self {
            RemoteObject::Folder(f) => f.last_modified,
            RemoteObject::Document(d) => d.last_modified,
            RemoteObject::Unsupported { .. } => None,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, RemoteObject::Folder(_))
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, RemoteObject::Unsupported { .. })
    }
}

/// Paging and projection options for child listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationContext {
    pub max_items_per_page: u32,
    pub include_path_segments: bool,
}

impl Default for OperationContext {
    fn default() -> Self {
        Self {
            max_items_per_page: 1000,
            include_path_segments: true,
        }
    }
}

/// Writable properties accepted by [`RemoteRepository::update_properties`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectProperties {
    pub name: Option<String>,
}

impl ObjectProperties {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}

/// Kind of change recorded in the repository change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    Created,
    Updated,
    Deleted,
    Security,
}

/// One change-log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub object_id: String,
    pub change_type: ChangeType,
    pub change_time: DateTime<Utc>,
}

/// One page of the change log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentChanges {
    pub events: Vec<ChangeEvent>,
    /// Token to continue from. `None` when the repository cannot provide one.
    pub next_token: Option<String>,
    /// More events exist beyond this page.
    pub has_more: bool,
}

/// Remote repository access used by the sync core.
///
/// Implementations must report failures through the categorised
/// [`BridgeError`](crate::BridgeError) variants: the engine turns
/// `NotFound`, `PermissionDenied`, `NameConstraint` and `CheckedOut` into
/// different reconciliation decisions.
#[async_trait]
pub trait RemoteRepository: Send + Sync {
    /// Fetch an object by its repository id.
    async fn get_object(&self, id: &str) -> Result<RemoteObject>;

    /// Fetch an object by its absolute repository path.
    async fn get_object_by_path(&self, path: &str) -> Result<RemoteObject>;

    /// List the direct children of a folder.
    async fn get_children(
        &self,
        folder_id: &str,
        context: &OperationContext,
    ) -> Result<Vec<RemoteObject>>;

    /// Download a document's content.
    async fn get_content_stream(&self, document_id: &str) -> Result<Bytes>;

    /// Replace a document's content.
    async fn set_content_stream(
        &self,
        document_id: &str,
        content: Bytes,
        overwrite: bool,
    ) -> Result<RemoteDocument>;

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<RemoteFolder>;

    async fn create_document(
        &self,
        parent_id: &str,
        name: &str,
        content: Bytes,
    ) -> Result<RemoteDocument>;

    /// Move an object from one folder to another.
    async fn move_object(
        &self,
        object_id: &str,
        source_folder_id: &str,
        target_folder_id: &str,
    ) -> Result<RemoteObject>;

    /// Update writable properties; used for renames.
    async fn update_properties(
        &self,
        object_id: &str,
        properties: &ObjectProperties,
    ) -> Result<RemoteObject>;

    /// Delete a folder and everything under it.
    async fn delete_tree(&self, folder_id: &str) -> Result<()>;

    /// Delete a document with its whole version series.
    async fn delete_all_versions(&self, document_id: &str) -> Result<()>;

    /// The repository's current change-log token, if change logging is on.
    async fn latest_change_log_token(&self) -> Result<Option<String>>;

    /// Read one page of change-log events after `token`.
    async fn get_content_changes(
        &self,
        token: &str,
        include_properties: bool,
        max_items: u32,
    ) -> Result<ContentChanges>;
}
