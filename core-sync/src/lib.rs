//! # Sync Core
//!
//! Bidirectional reconciliation between a local directory and a remote
//! document repository.
//!
//! ## Overview
//!
//! Every logical path is reconciled as a [`SyncTriplet`]: what the local
//! filesystem holds, what the metadata store recorded at the last agreement,
//! and what the repository holds. Producers discover triplets, an assembler
//! completes them and a worker pool classifies and applies them.
//!
//! ## Components
//!
//! - **Items and triplets** (`items`, `triplet`): immutable snapshots of the
//!   three sides and the factory joining them
//! - **Crawlers** (`crawler`): local tree walk, remote tree walk, filesystem
//!   watcher drain and change-log reader
//! - **Assembler** (`assembler`): joins local discoveries with remote state
//! - **Dependency tracker** (`dependencies`): parent-before-child creation,
//!   children-before-parent deletion
//! - **Processor** (`processor`): classification and per-action operations
//! - **Sync machine** (`machine`): runs full, change-log and watcher passes
//!
//! ## Usage
//!
//! ```rust,ignore
//! let machine = SyncMachine::connect(&config, repository, store, Some(events)).await?;
//! let report = machine.full_sync().await?;
//! let report = machine.change_log_sync().await?;
//! ```

pub mod assembler;
pub mod buffer;
pub mod context;
pub mod crawler;
pub mod dependencies;
pub mod error;
pub mod filter;
pub mod items;
pub mod machine;
pub mod processor;
pub mod report;
pub mod triplet;

pub use assembler::{Assembler, AssemblyStats};
pub use buffer::{InsertOutcome, RemoteBuffer};
pub use context::SyncContext;
pub use crawler::{
    ChangeBuffer, ChangeLogOutcome, ChangeLogProcessor, ChangeLogStart, LocalCrawlStats,
    LocalCrawler, RemoteCrawlStats, RemoteCrawler, WatcherProcessor, WatcherStats,
};
pub use dependencies::{Acquisition, DependencyOrder, ItemsDependencies};
pub use error::{Result, SyncError};
pub use filter::NameFilter;
pub use items::{DbStorageItem, LocalStorageItem, RemoteState, RemoteStorageItem};
pub use machine::SyncMachine;
pub use processor::{classify, SyncAction, TripletProcessor, WorkerOperations};
pub use report::{OperationResult, OperationTally, PassOutcome, SyncPassId, SyncReport};
pub use triplet::{RecordLookup, SyncTriplet, TripletFactory, TripletOrigin};
