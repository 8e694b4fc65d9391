//! # Assembler
//!
//! Completes local-origin triplets with their remote state.
//!
//! During a full pass the remote side usually comes from the
//! [`RemoteBuffer`] filled by the remote crawler. Items the buffer cannot
//! answer yet are handled by record:
//!
//! - Known to the store: the remote object is looked up directly, first by
//!   path, then by id to catch remote moves. The buffer key is tombstoned
//!   so the crawler's copy is not emitted a second time.
//! - Unknown to the store: parked until the remote crawl has finished,
//!   then either taken from the buffer or marked absent.
//!
//! Without a buffer (watcher passes) every item is looked up directly.
//! When the remote crawl is over, whatever remains in the buffer exists
//! only remotely and is emitted as remote-origin triplets.

use crate::buffer::RemoteBuffer;
use crate::crawler::{push_registered, register_triplet, RemoteCrawlStats};
use crate::context::SyncContext;
use crate::dependencies::ItemsDependencies;
use crate::error::Result;
use crate::items::RemoteStorageItem;
use crate::triplet::{triplet_name, RecordLookup, SyncTriplet, TripletFactory, TripletOrigin};
use bridge_traits::RemoteObject;
use core_async::queue::WorkQueue;
use core_async::task::JoinHandle;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyStats {
    pub from_buffer: usize,
    pub looked_up: usize,
    pub parked: usize,
    pub remote_only: usize,
    /// Remote state could not be determined; the item is skipped this pass.
    pub unresolved: usize,
}

pub struct Assembler {
    ctx: Arc<SyncContext>,
    deps: Arc<ItemsDependencies>,
    factory: TripletFactory,
    buffer: Option<Arc<RemoteBuffer>>,
    parked: Vec<SyncTriplet>,
    stats: AssemblyStats,
}

impl Assembler {
    /// Assembler for a full pass, backed by the remote crawl buffer.
    pub fn with_buffer(
        ctx: Arc<SyncContext>,
        deps: Arc<ItemsDependencies>,
        buffer: Arc<RemoteBuffer>,
    ) -> Self {
        Self::build(ctx, deps, Some(buffer))
    }

    /// Assembler resolving every item with direct repository lookups.
    pub fn direct(ctx: Arc<SyncContext>, deps: Arc<ItemsDependencies>) -> Self {
        Self::build(ctx, deps, None)
    }

    fn build(
        ctx: Arc<SyncContext>,
        deps: Arc<ItemsDependencies>,
        buffer: Option<Arc<RemoteBuffer>>,
    ) -> Self {
        let factory = TripletFactory::new(Arc::clone(&ctx));
        Self {
            ctx,
            deps,
            factory,
            buffer,
            parked: Vec::new(),
            stats: AssemblyStats::default(),
        }
    }

    pub fn stats(&self) -> AssemblyStats {
        self.stats
    }

    /// Consume `input` until it is closed and drained, forwarding every
    /// triplet that could be completed to `out`.
    #[instrument(skip_all)]
    pub async fn assemble(
        &mut self,
        input: &WorkQueue<SyncTriplet>,
        out: &WorkQueue<SyncTriplet>,
    ) -> Result<()> {
        while let Some(triplet) = input.pop().await {
            if let Some(ready) = self.resolve(triplet).await? {
                push_registered(&self.deps, out, ready).await?;
            }
        }
        debug!(parked = self.parked.len(), "Local side assembled");
        Ok(())
    }

    /// Wait for the remote crawl, then settle parked items and emit the
    /// remote-only leftovers.
    ///
    /// # Errors
    ///
    /// Fails when the remote crawl failed; parked items are dropped.
    #[instrument(skip_all)]
    pub async fn finish(
        &mut self,
        remote: JoinHandle<Result<RemoteCrawlStats>>,
        out: &WorkQueue<SyncTriplet>,
    ) -> Result<RemoteCrawlStats> {
        let crawl = match remote.await {
            Ok(Ok(stats)) => stats,
            Ok(Err(e)) => {
                self.drop_parked();
                return Err(e);
            }
            Err(e) => {
                self.drop_parked();
                return Err(e.into());
            }
        };

        let Some(buffer) = self.buffer.clone() else {
            return Ok(crawl);
        };

        for mut triplet in std::mem::take(&mut self.parked) {
            let remote = match buffer.take(triplet.name()).await {
                Some(remote) => {
                    self.stats.from_buffer += 1;
                    remote
                }
                None => RemoteStorageItem::absent(
                    self.ctx.remote_root.clone(),
                    triplet.remote().relative_path(),
                ),
            };
            triplet.assemble_remote_into_local(remote)?;
            push_registered(&self.deps, out, triplet).await?;
        }

        for remote in buffer.drain_waiting().await {
            let triplet = self
                .factory
                .from_remote(remote, RecordLookup::ByRemotePath, TripletOrigin::RemoteCrawl)
                .await?;
            register_triplet(&self.deps, &triplet);
            push_registered(&self.deps, out, triplet).await?;
            self.stats.remote_only += 1;
        }
        buffer.clear().await;

        info!(
            from_buffer = self.stats.from_buffer,
            looked_up = self.stats.looked_up,
            parked = self.stats.parked,
            remote_only = self.stats.remote_only,
            unresolved = self.stats.unresolved,
            "Assembly finished"
        );
        Ok(crawl)
    }

    fn drop_parked(&mut self) {
        for triplet in self.parked.drain(..) {
            self.deps.forget(triplet.name());
        }
    }

    /// Complete one triplet, or park it. `None` means parked.
    async fn resolve(&mut self, mut triplet: SyncTriplet) -> Result<Option<SyncTriplet>> {
        if triplet.remote().is_known() {
            return Ok(Some(triplet));
        }

        if let Some(buffer) = self.buffer.clone() {
            if let Some(remote) = buffer.take(triplet.name()).await {
                self.stats.from_buffer += 1;
                triplet.assemble_remote_into_local(remote)?;
                return Ok(Some(triplet));
            }

            if !triplet.db_exist() {
                self.stats.parked += 1;
                self.parked.push(triplet);
                return Ok(None);
            }

            // The crawler may reach the recorded remote path later; make
            // sure it does not emit it again.
            let recorded = triplet_name(triplet.remote().relative_path(), triplet.db().is_folder());
            if let Some(remote) = buffer.take_or_mark(&recorded).await {
                if recorded != triplet.name() {
                    self.deps.forget(&recorded);
                }
                self.stats.from_buffer += 1;
                triplet.assemble_remote_into_local(remote)?;
                return Ok(Some(triplet));
            }
        }

        self.stats.looked_up += 1;
        if let Some(remote) = self.lookup(&triplet).await? {
            triplet.assemble_remote_into_local(remote)?;
        } else {
            self.stats.unresolved += 1;
        }
        Ok(Some(triplet))
    }

    /// Direct repository lookup. `None` when the remote state cannot be
    /// determined right now.
    async fn lookup(&self, triplet: &SyncTriplet) -> Result<Option<RemoteStorageItem>> {
        let root = self.ctx.remote_root.clone();
        let relative = triplet.remote().relative_path().to_string();
        let full = self.ctx.remote_full_path(&relative);

        match self.ctx.repository.get_object_by_path(&full).await {
            Ok(object) if object.is_supported() => {
                return Ok(Some(RemoteStorageItem::present(root, relative, object)));
            }
            Ok(object) => {
                debug!(path = %full, name = object.name(), "Unsupported remote object in the way");
                return Ok(None);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                warn!(path = %full, error = %e, "Remote lookup failed");
                return Ok(None);
            }
        }

        let Some(remote_id) = triplet.db().remote_id() else {
            return Ok(Some(RemoteStorageItem::absent(root, relative)));
        };

        // Gone from its recorded path: moved, or deleted.
        match self.ctx.repository.get_object(remote_id).await {
            Ok(object) => Ok(Some(self.moved_object(object, relative).await)),
            Err(e) if e.is_not_found() => Ok(Some(RemoteStorageItem::absent(root, relative))),
            Err(e) => {
                warn!(remote_id, error = %e, "Remote lookup by id failed");
                Ok(None)
            }
        }
    }

    async fn moved_object(&self, object: RemoteObject, recorded: String) -> RemoteStorageItem {
        let root = self.ctx.remote_root.clone();
        let in_scope = object
            .path()
            .and_then(|path| self.ctx.remote_relative(path))
            .filter(|relative| self.ctx.filter.is_worth_syncing(relative));
        let Some(relative) = in_scope else {
            debug!(path = %recorded, "Remote object moved out of the synchronized tree");
            return RemoteStorageItem::absent(root, recorded);
        };

        debug!(from = %recorded, to = %relative, "Remote object moved");
        if let Some(buffer) = &self.buffer {
            let key = triplet_name(&relative, object.is_folder());
            if buffer.take_or_mark(&key).await.is_some() {
                self.deps.forget(&key);
            }
        }
        RemoteStorageItem::present(root, relative, object)
    }
}
