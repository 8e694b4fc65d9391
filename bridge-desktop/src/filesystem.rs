//! File System Access Implementation using Tokio

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{FileMetadata, FileSystemAccess},
};
use bytes::Bytes;
use core_async::time::{system_time_millis, Duration, UNIX_EPOCH};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Suffix of the scratch file used for atomic writes. The leading dot keeps
/// it out of every crawl.
const PARTIAL_SUFFIX: &str = ".sync-partial";

/// Tokio-based file system implementation
#[derive(Debug, Clone, Default)]
pub struct TokioFileSystem;

impl TokioFileSystem {
    pub fn new() -> Self {
        Self
    }

    /// Convert std::io::Error to BridgeError
    fn map_io_error(e: std::io::Error) -> BridgeError {
        BridgeError::Io(e)
    }

    fn partial_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!(".{name}{PARTIAL_SUFFIX}"))
    }
}

#[async_trait]
impl FileSystemAccess for TokioFileSystem {
    async fn exists(&self, path: &Path) -> Result<bool> {
        fs::try_exists(path).await.map_err(Self::map_io_error)
    }

    async fn metadata(&self, path: &Path) -> Result<FileMetadata> {
        let metadata = fs::metadata(path).await.map_err(Self::map_io_error)?;

        Ok(FileMetadata {
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            created_at: metadata.created().ok().map(system_time_millis),
            modified_at: metadata.modified().ok().map(system_time_millis),
            is_directory: metadata.is_dir(),
        })
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .await
            .map_err(Self::map_io_error)?;
        debug!(path = ?path, "Created directory");
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<Bytes> {
        let data = fs::read(path).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, size = data.len(), "Read file");
        Ok(Bytes::from(data))
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()> {
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent).await?;
        }

        let partial = Self::partial_path(path);
        let mut file = fs::File::create(&partial)
            .await
            .map_err(Self::map_io_error)?;
        file.write_all(data.as_ref())
            .await
            .map_err(Self::map_io_error)?;
        file.sync_all().await.map_err(Self::map_io_error)?;
        drop(file);

        if let Err(e) = fs::rename(&partial, path).await {
            let _ = fs::remove_file(&partial).await;
            return Err(Self::map_io_error(e));
        }

        debug!(path = ?path, size = data.len(), "Wrote file");
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).await.map_err(Self::map_io_error)?;
        debug!(from = ?from, to = ?to, "Renamed");
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, "Deleted file");
        Ok(())
    }

    async fn remove_dir(&self, path: &Path) -> Result<()> {
        fs::remove_dir(path).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, "Removed directory");
        Ok(())
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(path).await.map_err(Self::map_io_error)?;

        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(Self::map_io_error)?
        {
            entries.push(entry.path());
        }

        entries.sort();
        debug!(path = ?path, count = entries.len(), "Listed directory");
        Ok(entries)
    }

    async fn set_modified(&self, path: &Path, modified_at: i64) -> Result<()> {
        let path = path.to_path_buf();
        let time = if modified_at >= 0 {
            UNIX_EPOCH + Duration::from_millis(modified_at as u64)
        } else {
            UNIX_EPOCH - Duration::from_millis(modified_at.unsigned_abs())
        };

        core_async::task::spawn_blocking(move || {
            std::fs::File::options()
                .write(true)
                .open(&path)
                .and_then(|file| file.set_modified(time))
        })
        .await
        .map_err(|e| BridgeError::OperationFailed(e.to_string()))?
        .map_err(Self::map_io_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[core_async::test]
    async fn test_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::new();
        let test_file = dir.path().join("nested/test-file.txt");

        let data = Bytes::from("Hello, World!");
        fs.write_file(&test_file, data.clone()).await.unwrap();

        let read_data = fs.read_file(&test_file).await.unwrap();
        assert_eq!(data, read_data);
        assert!(!fs
            .exists(&TokioFileSystem::partial_path(&test_file))
            .await
            .unwrap());
    }

    #[core_async::test]
    async fn test_metadata_and_set_modified() {
        let dir = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::new();
        let file = dir.path().join("a.txt");
        fs.write_file(&file, Bytes::from_static(b"12345")).await.unwrap();

        fs.set_modified(&file, 1_600_000_000_000).await.unwrap();
        let meta = fs.metadata(&file).await.unwrap();
        assert_eq!(meta.size, 5);
        assert_eq!(meta.modified_at, Some(1_600_000_000_000));
        assert!(!meta.is_directory);

        let dir_meta = fs.metadata(dir.path()).await.unwrap();
        assert!(dir_meta.is_directory);
    }

    #[core_async::test]
    async fn test_remove_dir_refuses_non_empty() {
        let dir = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::new();
        let folder = dir.path().join("folder");
        fs.write_file(&folder.join("keep.txt"), Bytes::from_static(b"x"))
            .await
            .unwrap();

        assert!(fs.remove_dir(&folder).await.is_err());

        fs.delete_file(&folder.join("keep.txt")).await.unwrap();
        fs.remove_dir(&folder).await.unwrap();
        assert!(!fs.exists(&folder).await.unwrap());
    }

    #[core_async::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::new();
        let err = fs.metadata(&dir.path().join("nope")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[core_async::test]
    async fn test_list_directory_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::new();
        fs.write_file(&dir.path().join("b"), Bytes::new()).await.unwrap();
        fs.write_file(&dir.path().join("a"), Bytes::new()).await.unwrap();

        let entries = fs.list_directory(dir.path()).await.unwrap();
        assert_eq!(entries, vec![dir.path().join("a"), dir.path().join("b")]);
    }
}
