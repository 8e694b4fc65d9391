//! Full walk of the local tree.

use super::{push_registered, register_triplet};
use crate::context::{join_relative, SyncContext};
use crate::dependencies::ItemsDependencies;
use crate::error::{Result, SyncError};
use crate::triplet::{SyncTriplet, TripletFactory, TripletOrigin};
use core_async::queue::WorkQueue;
use core_store::MappedObject;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalCrawlStats {
    pub changed: usize,
    pub unchanged: usize,
    /// Recorded items no longer on disk.
    pub deleted: usize,
}

/// Walks the local root and emits one triplet per worth-syncing entry.
///
/// Entries that still match their record are held back and queued after
/// everything else, so real work starts sooner. Once the walk is done the
/// store is scanned for records whose local entry has disappeared.
pub struct LocalCrawler {
    ctx: Arc<SyncContext>,
    deps: Arc<ItemsDependencies>,
    factory: TripletFactory,
}

impl LocalCrawler {
    pub fn new(ctx: Arc<SyncContext>, deps: Arc<ItemsDependencies>) -> Self {
        let factory = TripletFactory::new(Arc::clone(&ctx));
        Self { ctx, deps, factory }
    }

    /// Crawl into `out`, closing it when done (also on failure).
    #[instrument(skip_all, fields(root = %self.ctx.local_root.display()))]
    pub async fn run(self, out: WorkQueue<SyncTriplet>) -> Result<LocalCrawlStats> {
        let result = self.crawl(&out).await;
        out.close();
        match &result {
            Ok(stats) => info!(
                changed = stats.changed,
                unchanged = stats.unchanged,
                deleted = stats.deleted,
                "Local crawl finished"
            ),
            Err(e) => warn!(error = %e, "Local crawl aborted"),
        }
        result
    }

    async fn crawl(&self, out: &WorkQueue<SyncTriplet>) -> Result<LocalCrawlStats> {
        let mut stats = LocalCrawlStats::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut unchanged: Vec<SyncTriplet> = Vec::new();
        let mut stack: Vec<String> = vec![String::new()];

        while let Some(dir) = stack.pop() {
            let full = self.ctx.local_full_path(&dir);
            let entries = match self.ctx.fs.list_directory(&full).await {
                Ok(entries) => entries,
                // Without the root listing every record would look deleted.
                Err(e) if dir.is_empty() => return Err(e.into()),
                Err(e) => {
                    warn!(dir = %dir, error = %e, "Cannot list local folder; skipping subtree");
                    continue;
                }
            };

            let mut subfolders = Vec::new();
            for entry in entries {
                let Some(name) = entry.file_name().and_then(|n| n.to_str()) else {
                    warn!(path = %entry.display(), "Skipping non UTF-8 name");
                    continue;
                };
                if !self.ctx.filter.is_worth_syncing_name(name) {
                    debug!(dir = %dir, name, "Not worth syncing");
                    continue;
                }

                let relative = join_relative(&dir, name);
                seen.insert(relative.clone());

                let triplet = match self.factory.from_local(&relative, TripletOrigin::LocalCrawl).await {
                    Ok(triplet) => triplet,
                    Err(SyncError::Bridge(e)) => {
                        warn!(path = %relative, error = %e, "Cannot read local entry; skipping");
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                if !triplet.local_exist() {
                    // Vanished between listing and stat.
                    continue;
                }
                if triplet.is_folder() {
                    subfolders.push(relative);
                }

                register_triplet(&self.deps, &triplet);
                if triplet.local_eq_db() {
                    stats.unchanged += 1;
                    unchanged.push(triplet);
                } else {
                    stats.changed += 1;
                    push_registered(&self.deps, out, triplet).await?;
                }
            }
            stack.extend(subfolders.into_iter().rev());
        }

        stats.deleted = self.emit_deleted(&seen, out).await?;

        for triplet in unchanged {
            push_registered(&self.deps, out, triplet).await?;
        }
        Ok(stats)
    }

    /// Emit a triplet for every record whose local entry is gone.
    async fn emit_deleted(&self, seen: &HashSet<String>, out: &WorkQueue<SyncTriplet>) -> Result<usize> {
        let folders = self.ctx.store.list_folders().await?;
        let files = self.ctx.store.list_files().await?;
        let records = folders
            .into_iter()
            .map(MappedObject::Folder)
            .chain(files.into_iter().map(MappedObject::File));

        let mut triplets = Vec::new();
        for record in records {
            let local_path = record.local_path();
            if seen.contains(local_path) || !self.ctx.filter.is_worth_syncing(local_path) {
                continue;
            }
            let full = self.ctx.local_full_path(local_path);
            if self.ctx.fs.exists(&full).await? {
                // Present but not walked, e.g. inside an unreadable folder.
                continue;
            }

            debug!(path = %local_path, "Recorded item missing locally");
            let triplet = self
                .factory
                .from_record(record, None, TripletOrigin::LocalCrawl)
                .await?;
            triplets.push(triplet);
        }

        // Folders come first in the store listing; every child edge must be
        // in place before a folder delete can be picked up by a worker.
        for triplet in &triplets {
            register_triplet(&self.deps, triplet);
        }
        let deleted = triplets.len();
        for triplet in triplets {
            push_registered(&self.deps, out, triplet).await?;
        }
        Ok(deleted)
    }
}
