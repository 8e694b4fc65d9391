//! # Crawlers
//!
//! Four independent producers of triplets:
//!
//! - [`LocalCrawler`]: full local tree walk plus deletions recorded in the
//!   store but gone from disk
//! - [`RemoteCrawler`]: full remote tree walk into the shared
//!   [`RemoteBuffer`](crate::buffer::RemoteBuffer)
//! - [`WatcherProcessor`]: buffered filesystem events
//! - [`ChangeLogProcessor`]: the repository change log
//!
//! Every emitted triplet is registered with the dependency tracker, with an
//! edge to its parent folder, before it is queued.

mod changelog;
mod local;
mod remote;
mod watcher;

pub use changelog::{ChangeBuffer, ChangeLogOutcome, ChangeLogProcessor, ChangeLogStart};
pub use local::{LocalCrawlStats, LocalCrawler};
pub use remote::{RemoteCrawlStats, RemoteCrawler};
pub use watcher::{WatcherProcessor, WatcherStats};

use crate::dependencies::ItemsDependencies;
use crate::error::{Result, SyncError};
use crate::triplet::SyncTriplet;
use core_async::queue::WorkQueue;

/// Record a triplet and its parent edge in the dependency tracker.
pub(crate) fn register_triplet(deps: &ItemsDependencies, triplet: &SyncTriplet) {
    register_name(deps, triplet.name(), triplet.parent_name().as_deref());
}

pub(crate) fn register_name(deps: &ItemsDependencies, name: &str, parent: Option<&str>) {
    deps.register(name);
    if let Some(parent) = parent {
        deps.add_item_dependence(name, parent);
    }
}

/// Queue an already registered triplet.
///
/// # Errors
///
/// Returns [`SyncError::Aborted`] when the consumer closed the queue.
pub(crate) async fn push_registered(
    deps: &ItemsDependencies,
    queue: &WorkQueue<SyncTriplet>,
    triplet: SyncTriplet,
) -> Result<()> {
    if let Err(rejected) = queue.push(triplet).await {
        deps.forget(rejected.0.name());
        return Err(SyncError::Aborted);
    }
    Ok(())
}

/// Register then queue a triplet.
pub(crate) async fn emit(
    deps: &ItemsDependencies,
    queue: &WorkQueue<SyncTriplet>,
    triplet: SyncTriplet,
) -> Result<()> {
    register_triplet(deps, &triplet);
    push_registered(deps, queue, triplet).await
}
