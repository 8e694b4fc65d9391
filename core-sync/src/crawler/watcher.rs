//! Turns buffered filesystem events into triplets.

use super::emit;
use crate::context::SyncContext;
use crate::dependencies::ItemsDependencies;
use crate::error::Result;
use crate::triplet::{SyncTriplet, TripletFactory, TripletOrigin};
use bridge_traits::{FsEventKind, FsEventQueue};
use core_async::queue::WorkQueue;
use core_store::MappedObject;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherStats {
    pub events: usize,
    pub emitted: usize,
    pub ignored: usize,
    /// Removals confirmed after the grace delay.
    pub removed: usize,
}

/// Drains the watcher queue once.
///
/// Deletes and renames to an ignored name are ambiguous: editors save by
/// deleting and recreating. Those paths are re-checked after the grace
/// delay; a path that is back is treated as changed, a path still missing
/// produces nothing here (the next full or change-log pass reconciles it).
pub struct WatcherProcessor {
    ctx: Arc<SyncContext>,
    deps: Arc<ItemsDependencies>,
    factory: TripletFactory,
}

struct Drain<'a> {
    out: &'a WorkQueue<SyncTriplet>,
    seen: HashSet<String>,
    recheck: Vec<String>,
    stats: WatcherStats,
}

impl WatcherProcessor {
    pub fn new(ctx: Arc<SyncContext>, deps: Arc<ItemsDependencies>) -> Self {
        let factory = TripletFactory::new(Arc::clone(&ctx));
        Self { ctx, deps, factory }
    }

    /// Process every event queued so far into `out`, then close it.
    #[instrument(skip_all)]
    pub async fn run(self, events: &FsEventQueue, out: WorkQueue<SyncTriplet>) -> Result<WatcherStats> {
        let mut drain = Drain {
            out: &out,
            seen: HashSet::new(),
            recheck: Vec::new(),
            stats: WatcherStats::default(),
        };
        let result = self.process(events, &mut drain).await;
        out.close();
        result?;

        let stats = drain.stats;
        info!(
            events = stats.events,
            emitted = stats.emitted,
            removed = stats.removed,
            "Watcher events processed"
        );
        Ok(stats)
    }

    async fn process(&self, events: &FsEventQueue, drain: &mut Drain<'_>) -> Result<()> {
        while let Some(event) = events.try_pop() {
            drain.stats.events += 1;
            let Some(relative) = self.ctx.local_relative(&event.path) else {
                drain.stats.ignored += 1;
                continue;
            };

            match event.kind {
                FsEventKind::Created | FsEventKind::Changed => {
                    if self.ctx.filter.is_worth_syncing(&relative) {
                        self.emit_local(&relative, None, drain).await?;
                    } else {
                        drain.stats.ignored += 1;
                    }
                }
                FsEventKind::Deleted => {
                    if self.ctx.filter.is_worth_syncing(&relative) {
                        drain.recheck.push(relative);
                    } else {
                        drain.stats.ignored += 1;
                    }
                }
                FsEventKind::Renamed { old_path } => {
                    let old_relative = self.ctx.local_relative(&old_path);
                    self.handle_rename(old_relative, relative, drain).await?;
                }
            }
        }

        if drain.recheck.is_empty() {
            return Ok(());
        }

        core_async::time::sleep(self.ctx.settings.grace_delay).await;
        for relative in std::mem::take(&mut drain.recheck) {
            let full = self.ctx.local_full_path(&relative);
            if self.ctx.fs.exists(&full).await? {
                debug!(path = %relative, "Path reappeared within the grace delay");
                self.emit_local(&relative, None, drain).await?;
            } else {
                debug!(path = %relative, "Removal confirmed");
                drain.stats.removed += 1;
            }
        }
        Ok(())
    }

    async fn handle_rename(
        &self,
        old_relative: Option<String>,
        new_relative: String,
        drain: &mut Drain<'_>,
    ) -> Result<()> {
        let filter = &self.ctx.filter;
        let old_worth = old_relative
            .as_deref()
            .is_some_and(|old| filter.is_worth_syncing(old));
        let new_worth = filter.is_worth_syncing(&new_relative);

        let old_record = match old_relative.as_deref() {
            Some(old) => self.ctx.store.find_by_local_path(old).await?,
            None => None,
        };
        let new_known = self.ctx.store.find_by_local_path(&new_relative).await?.is_some();

        match (old_record, new_known) {
            // Both known: content of the target changed.
            (Some(_), true) => self.emit_local(&new_relative, None, drain).await,
            // Known item moved to an unknown path: keep its remote identity.
            (Some(record), false) if new_worth => {
                debug!(
                    from = %record.local_path(),
                    to = %new_relative,
                    "Local rename of a known item"
                );
                self.emit_local(&new_relative, Some(record), drain).await
            }
            (None, _) if new_worth => self.emit_local(&new_relative, None, drain).await,
            _ if old_worth && !new_worth => {
                if let Some(old) = old_relative {
                    drain.recheck.push(old);
                }
                Ok(())
            }
            _ => {
                drain.stats.ignored += 1;
                Ok(())
            }
        }
    }

    async fn emit_local(
        &self,
        relative: &str,
        record: Option<MappedObject>,
        drain: &mut Drain<'_>,
    ) -> Result<()> {
        if !drain.seen.insert(relative.to_string()) {
            return Ok(());
        }

        let triplet = match record {
            Some(record) => {
                self.factory
                    .from_local_with_record(relative, Some(record), TripletOrigin::Watcher)
                    .await?
            }
            None => self.factory.from_local(relative, TripletOrigin::Watcher).await?,
        };
        if !triplet.local_exist() {
            debug!(path = %relative, "Path vanished before it could be processed");
            return Ok(());
        }

        emit(&self.deps, drain.out, triplet).await?;
        drain.stats.emitted += 1;
        Ok(())
    }
}
