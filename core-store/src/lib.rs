//! # Metadata Store
//!
//! The only persistent state of the sync engine: the record of the last
//! state on which local and remote agreed.
//!
//! - `files` / `folders`: local path to remote path and id, plus the
//!   checksum and timestamps observed when the item was last reconciled
//! - `operation_retries`: per-path, per-kind, per-operation failure counters
//! - `general`: the persisted change-log token
//!
//! The engine never caches this data across passes; every pass re-reads it.

pub mod db;
pub mod error;
pub mod metadata;
pub mod models;

pub use db::{create_pool, create_test_pool, DatabaseConfig};
pub use error::{Result, StoreError};
pub use metadata::{MetadataStore, SqliteMetadataStore};
pub use models::{MappedFile, MappedFolder, MappedObject, ObjectKind, OperationKind};
