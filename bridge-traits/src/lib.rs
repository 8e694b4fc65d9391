//! # Host Bridge Traits
//!
//! Contracts between the sync core and the collaborators it drives but does
//! not own.
//!
//! ## Traits
//!
//! - [`RemoteRepository`](repository::RemoteRepository) - Remote document repository client
//! - [`FileSystemAccess`](storage::FileSystemAccess) - Local file I/O
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! The filesystem watcher is a data contract only: the host pushes
//! [`FsEvent`](watcher::FsEvent)s into a shared queue.
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type.
//! Implementations should:
//!
//! - Map native errors onto the closest category (not-found, permission,
//!   name constraint, checked-out, connection)
//! - Include error context (object id, path)
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds: the sync core shares
//! them across crawler and worker tasks.

pub mod error;
pub mod repository;
pub mod storage;
pub mod time;
pub mod watcher;

pub use error::BridgeError;

pub use repository::{
    ChangeEvent, ChangeType, ContentChanges, ObjectProperties, OperationContext, RemoteDocument,
    RemoteFolder, RemoteObject, RemoteRepository,
};
pub use storage::{FileMetadata, FileSystemAccess};
pub use time::{Clock, FixedClock, LogEntry, LogLevel, LoggerSink, SystemClock};
pub use watcher::{FsEvent, FsEventKind, FsEventQueue};
