//! Local filesystem abstraction.
//!
//! All paths handed to [`FileSystemAccess`] are absolute. The sync core
//! joins its relative paths onto the configured local root before calling in.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// File metadata information. Timestamps are Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub size: u64,
    pub created_at: Option<i64>,
    pub modified_at: Option<i64>,
    pub is_directory: bool,
}

/// File system access trait
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn touch(fs: &dyn FileSystemAccess, root: &Path) -> Result<()> {
///     fs.create_dir_all(&root.join("a")).await?;
///     fs.write_file(&root.join("a/b.txt"), Bytes::from_static(b"hello")).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Check if a file or directory exists
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Get metadata for a file or directory
    async fn metadata(&self, path: &Path) -> Result<FileMetadata>;

    /// Create a directory and all parent directories if they don't exist
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Read entire file contents into memory
    async fn read_file(&self, path: &Path) -> Result<Bytes>;

    /// Write data to a file, creating or replacing it.
    ///
    /// Implementations should make the replacement atomic so a crash never
    /// leaves a half-written file at `path`.
    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()>;

    /// Rename or move a file or directory.
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Delete a file
    async fn delete_file(&self, path: &Path) -> Result<()>;

    /// Delete an empty directory. Fails if the directory has entries.
    async fn remove_dir(&self, path: &Path) -> Result<()>;

    /// List all entries in a directory
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Set a file's modification time (Unix milliseconds).
    async fn set_modified(&self, path: &Path, modified_at: i64) -> Result<()>;
}
