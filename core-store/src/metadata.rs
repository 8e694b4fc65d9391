//! Metadata store trait and SQLite implementation

use crate::error::{Result, StoreError};
use crate::models::{MappedFile, MappedFolder, MappedObject, ObjectKind, OperationKind};
use async_trait::async_trait;
use core_async::time::now_millis;
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

const CHANGE_LOG_TOKEN_KEY: &str = "change_log_token";

/// Durable record of the last reconciled state.
///
/// All paths are relative to their sync root. Callers never cache results
/// across passes.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Look up a record by local path, files first then folders.
    async fn find_by_local_path(&self, local_path: &str) -> Result<Option<MappedObject>>;

    /// Look up a record by remote path, files first then folders.
    async fn find_by_remote_path(&self, remote_path: &str) -> Result<Option<MappedObject>>;

    /// Look up a record by remote object id.
    async fn find_by_remote_id(&self, remote_id: &str) -> Result<Option<MappedObject>>;

    /// Insert or replace a file record.
    async fn add_file(&self, file: &MappedFile) -> Result<()>;

    /// Insert or replace a folder record.
    async fn add_folder(&self, folder: &MappedFolder) -> Result<()>;

    /// Remove a file record and its retry counters.
    ///
    /// # Returns
    /// - `Ok(true)` if a record was removed
    /// - `Ok(false)` if there was nothing to remove
    async fn remove_file(&self, local_path: &str) -> Result<bool>;

    /// Remove a folder record together with every record below it.
    async fn remove_folder(&self, local_path: &str) -> Result<bool>;

    /// Replace the record at `old_local_path` with `file`.
    async fn move_file(&self, old_local_path: &str, file: &MappedFile) -> Result<()>;

    /// Replace the folder record at `old_local_path` with `folder` and
    /// rewrite the local and remote paths of all descendants.
    async fn move_folder(&self, old_local_path: &str, folder: &MappedFolder) -> Result<()>;

    async fn list_files(&self) -> Result<Vec<MappedFile>>;

    async fn list_folders(&self) -> Result<Vec<MappedFolder>>;

    async fn operation_retry_count(
        &self,
        local_path: &str,
        kind: ObjectKind,
        operation: OperationKind,
    ) -> Result<u32>;

    /// Bump the failure counter and return the new value.
    async fn increment_operation_retry(
        &self,
        local_path: &str,
        kind: ObjectKind,
        operation: OperationKind,
    ) -> Result<u32>;

    async fn reset_operation_retry(
        &self,
        local_path: &str,
        kind: ObjectKind,
        operation: OperationKind,
    ) -> Result<()>;

    /// The change-log token recorded after the last completed pass.
    async fn change_log_token(&self) -> Result<Option<String>>;

    async fn set_change_log_token(&self, token: Option<&str>) -> Result<()>;
}

// ============================================================================
// Row types
// ============================================================================

#[derive(Debug, FromRow)]
struct FileRow {
    local_path: String,
    remote_path: String,
    remote_id: String,
    checksum: Option<String>,
    local_modified: Option<i64>,
    remote_modified: Option<i64>,
    size: Option<i64>,
}

impl From<FileRow> for MappedFile {
    fn from(row: FileRow) -> Self {
        Self {
            local_path: row.local_path,
            remote_path: row.remote_path,
            remote_id: row.remote_id,
            checksum: row.checksum,
            local_modified: row.local_modified,
            remote_modified: row.remote_modified,
            size: row.size.and_then(|s| u64::try_from(s).ok()),
        }
    }
}

#[derive(Debug, FromRow)]
struct FolderRow {
    local_path: String,
    remote_path: String,
    remote_id: String,
    remote_modified: Option<i64>,
}

impl From<FolderRow> for MappedFolder {
    fn from(row: FolderRow) -> Self {
        Self {
            local_path: row.local_path,
            remote_path: row.remote_path,
            remote_id: row.remote_id,
            remote_modified: row.remote_modified,
        }
    }
}

const FILE_COLUMNS: &str =
    "local_path, remote_path, remote_id, checksum, local_modified, remote_modified, size";
const FOLDER_COLUMNS: &str = "local_path, remote_path, remote_id, remote_modified";

// ============================================================================
// SQLite implementation
// ============================================================================

pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn find_by_column(&self, column: &str, value: &str) -> Result<Option<MappedObject>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE {column} = ? LIMIT 1");
        let file: Option<FileRow> = sqlx::query_as(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = file {
            return Ok(Some(MappedObject::File(row.into())));
        }

        let sql = format!("SELECT {FOLDER_COLUMNS} FROM folders WHERE {column} = ? LIMIT 1");
        let folder: Option<FolderRow> = sqlx::query_as(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        Ok(folder.map(|row| MappedObject::Folder(row.into())))
    }
}

fn validate_relative(field: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(StoreError::InvalidInput {
            field: field.to_string(),
            message: "path must not be empty".to_string(),
        });
    }
    if path.starts_with('/') || path.ends_with('/') {
        return Err(StoreError::InvalidInput {
            field: field.to_string(),
            message: format!("'{path}' must be relative without a trailing separator"),
        });
    }
    Ok(())
}

fn size_to_db(size: Option<u64>) -> Option<i64> {
    size.and_then(|s| i64::try_from(s).ok())
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn find_by_local_path(&self, local_path: &str) -> Result<Option<MappedObject>> {
        self.find_by_column("local_path", local_path).await
    }

    async fn find_by_remote_path(&self, remote_path: &str) -> Result<Option<MappedObject>> {
        self.find_by_column("remote_path", remote_path).await
    }

    async fn find_by_remote_id(&self, remote_id: &str) -> Result<Option<MappedObject>> {
        self.find_by_column("remote_id", remote_id).await
    }

    async fn add_file(&self, file: &MappedFile) -> Result<()> {
        validate_relative("local_path", &file.local_path)?;
        validate_relative("remote_path", &file.remote_path)?;

        sqlx::query(
            r#"
            INSERT INTO files (
                local_path, remote_path, remote_id, checksum,
                local_modified, remote_modified, size, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(local_path) DO UPDATE SET
                remote_path = excluded.remote_path,
                remote_id = excluded.remote_id,
                checksum = excluded.checksum,
                local_modified = excluded.local_modified,
                remote_modified = excluded.remote_modified,
                size = excluded.size,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&file.local_path)
        .bind(&file.remote_path)
        .bind(&file.remote_id)
        .bind(&file.checksum)
        .bind(file.local_modified)
        .bind(file.remote_modified)
        .bind(size_to_db(file.size))
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        debug!(local_path = %file.local_path, remote_id = %file.remote_id, "Recorded file");
        Ok(())
    }

    async fn add_folder(&self, folder: &MappedFolder) -> Result<()> {
        validate_relative("local_path", &folder.local_path)?;
        validate_relative("remote_path", &folder.remote_path)?;

        sqlx::query(
            r#"
            INSERT INTO folders (local_path, remote_path, remote_id, remote_modified, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(local_path) DO UPDATE SET
                remote_path = excluded.remote_path,
                remote_id = excluded.remote_id,
                remote_modified = excluded.remote_modified,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&folder.local_path)
        .bind(&folder.remote_path)
        .bind(&folder.remote_id)
        .bind(folder.remote_modified)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        debug!(local_path = %folder.local_path, remote_id = %folder.remote_id, "Recorded folder");
        Ok(())
    }

    async fn remove_file(&self, local_path: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM files WHERE local_path = ?")
            .bind(local_path)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM operation_retries WHERE local_path = ? AND object_kind = 'file'")
            .bind(local_path)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_folder(&self, local_path: &str) -> Result<bool> {
        let prefix = format!("{local_path}/");
        let prefix_len = prefix.chars().count() as i64;
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM folders WHERE local_path = ?")
            .bind(local_path)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        for table in ["folders", "files", "operation_retries"] {
            let sql = format!("DELETE FROM {table} WHERE substr(local_path, 1, ?) = ?");
            sqlx::query(&sql)
                .bind(prefix_len)
                .bind(&prefix)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(
            "DELETE FROM operation_retries WHERE local_path = ? AND object_kind = 'folder'",
        )
        .bind(local_path)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(local_path, removed, "Removed folder record and descendants");
        Ok(removed > 0)
    }

    async fn move_file(&self, old_local_path: &str, file: &MappedFile) -> Result<()> {
        validate_relative("local_path", &file.local_path)?;
        validate_relative("remote_path", &file.remote_path)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM files WHERE local_path = ?")
            .bind(old_local_path)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO files (
                local_path, remote_path, remote_id, checksum,
                local_modified, remote_modified, size, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&file.local_path)
        .bind(&file.remote_path)
        .bind(&file.remote_id)
        .bind(&file.checksum)
        .bind(file.local_modified)
        .bind(file.remote_modified)
        .bind(size_to_db(file.size))
        .bind(now_millis())
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE operation_retries SET local_path = ? WHERE local_path = ? AND object_kind = 'file'")
            .bind(&file.local_path)
            .bind(old_local_path)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(from = old_local_path, to = %file.local_path, "Moved file record");
        Ok(())
    }

    async fn move_folder(&self, old_local_path: &str, folder: &MappedFolder) -> Result<()> {
        validate_relative("local_path", &folder.local_path)?;
        validate_relative("remote_path", &folder.remote_path)?;

        let mut tx = self.pool.begin().await?;

        let old_remote: Option<(String,)> =
            sqlx::query_as("SELECT remote_path FROM folders WHERE local_path = ?")
                .bind(old_local_path)
                .fetch_optional(&mut *tx)
                .await?;
        let old_remote_path = old_remote
            .map(|(p,)| p)
            .unwrap_or_else(|| old_local_path.to_string());

        sqlx::query("DELETE FROM folders WHERE local_path = ?")
            .bind(old_local_path)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO folders (local_path, remote_path, remote_id, remote_modified, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&folder.local_path)
        .bind(&folder.remote_path)
        .bind(&folder.remote_id)
        .bind(folder.remote_modified)
        .bind(now_millis())
        .execute(&mut *tx)
        .await?;

        let old_local_prefix = format!("{old_local_path}/");
        let old_local_len = old_local_prefix.chars().count() as i64;
        let old_remote_prefix = format!("{old_remote_path}/");
        let old_remote_len = old_remote_prefix.chars().count() as i64;
        let new_local_prefix = format!("{}/", folder.local_path);
        let new_remote_prefix = format!("{}/", folder.remote_path);

        for table in ["folders", "files"] {
            let sql = format!(
                r#"
                UPDATE {table} SET
                    local_path = ? || substr(local_path, ? + 1),
                    remote_path = CASE
                        WHEN substr(remote_path, 1, ?) = ? THEN ? || substr(remote_path, ? + 1)
                        ELSE remote_path
                    END
                WHERE substr(local_path, 1, ?) = ?
                "#
            );
            sqlx::query(&sql)
                .bind(&new_local_prefix)
                .bind(old_local_len)
                .bind(old_remote_len)
                .bind(&old_remote_prefix)
                .bind(&new_remote_prefix)
                .bind(old_remote_len)
                .bind(old_local_len)
                .bind(&old_local_prefix)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM operation_retries WHERE substr(local_path, 1, ?) = ?")
            .bind(old_local_len)
            .bind(&old_local_prefix)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(from = old_local_path, to = %folder.local_path, "Moved folder record");
        Ok(())
    }

    async fn list_files(&self) -> Result<Vec<MappedFile>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files ORDER BY local_path");
        let rows: Vec<FileRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_folders(&self) -> Result<Vec<MappedFolder>> {
        let sql = format!("SELECT {FOLDER_COLUMNS} FROM folders ORDER BY local_path");
        let rows: Vec<FolderRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn operation_retry_count(
        &self,
        local_path: &str,
        kind: ObjectKind,
        operation: OperationKind,
    ) -> Result<u32> {
        let count: Option<(i64,)> = sqlx::query_as(
            "SELECT count FROM operation_retries WHERE local_path = ? AND object_kind = ? AND operation = ?",
        )
        .bind(local_path)
        .bind(kind.as_str())
        .bind(operation.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(count.map(|(c,)| c.max(0) as u32).unwrap_or(0))
    }

    async fn increment_operation_retry(
        &self,
        local_path: &str,
        kind: ObjectKind,
        operation: OperationKind,
    ) -> Result<u32> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO operation_retries (local_path, object_kind, operation, count)
            VALUES (?, ?, ?, 1)
            ON CONFLICT(local_path, object_kind, operation) DO UPDATE SET count = count + 1
            RETURNING count
            "#,
        )
        .bind(local_path)
        .bind(kind.as_str())
        .bind(operation.as_str())
        .fetch_one(&self.pool)
        .await?;

        debug!(local_path, %kind, %operation, count, "Incremented retry counter");
        Ok(count.max(0) as u32)
    }

    async fn reset_operation_retry(
        &self,
        local_path: &str,
        kind: ObjectKind,
        operation: OperationKind,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM operation_retries WHERE local_path = ? AND object_kind = ? AND operation = ?",
        )
        .bind(local_path)
        .bind(kind.as_str())
        .bind(operation.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn change_log_token(&self) -> Result<Option<String>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT value FROM general WHERE key = ?")
                .bind(CHANGE_LOG_TOKEN_KEY)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|(v,)| v))
    }

    async fn set_change_log_token(&self, token: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO general (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(CHANGE_LOG_TOKEN_KEY)
        .bind(token)
        .execute(&self.pool)
        .await?;

        debug!(token = ?token, "Stored change-log token");
        Ok(())
    }
}
