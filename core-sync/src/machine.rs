//! # Sync Machine
//!
//! Orchestrates passes over one sync root. Exactly one pass runs at a time;
//! a second request while a pass is running fails fast with
//! [`SyncError::SyncInProgress`].
//!
//! ## Full pass
//!
//! ```text
//! RemoteCrawler ──► RemoteBuffer ◄──┐
//!                                   │
//! LocalCrawler ──► local queue ──► Assembler ──► processor queue ──► TripletProcessor
//! ```
//!
//! 1. Fetch the server change-log token
//! 2. Start the remote crawler, local crawler and processor
//! 3. Assemble the local stream as it arrives
//! 4. Wait for the remote crawler; emit parked and remote-only items
//! 5. Close the processor queue and wait for it to drain
//! 6. Store the token fetched in step 1
//!
//! ## Change-log pass
//!
//! Compares tokens first and returns immediately when they match. A change
//! log that cannot be applied incrementally turns into a full pass under the
//! same lock.
//!
//! ## Watcher pass
//!
//! Drains buffered filesystem events through the assembler in direct-lookup
//! mode.

use crate::assembler::Assembler;
use crate::buffer::RemoteBuffer;
use crate::context::SyncContext;
use crate::crawler::{
    ChangeLogOutcome, ChangeLogProcessor, ChangeLogStart, LocalCrawlStats, LocalCrawler,
    RemoteCrawlStats, RemoteCrawler, WatcherProcessor,
};
use crate::dependencies::ItemsDependencies;
use crate::error::{Result, SyncError};
use crate::filter::NameFilter;
use crate::processor::TripletProcessor;
use crate::report::{PassOutcome, SyncPassId, SyncReport};
use crate::triplet::SyncTriplet;
use bridge_traits::{FsEventQueue, RemoteObject, RemoteRepository};
use core_async::queue::WorkQueue;
use core_async::sync::{Mutex, MutexGuard};
use core_async::task::{self, JoinHandle};
use core_async::time::Instant;
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, PassKind, SyncEvent};
use core_runtime::logging::sync_span;
use core_store::MetadataStore;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

pub struct SyncMachine {
    ctx: Arc<SyncContext>,
    pass_lock: Mutex<()>,
}

impl SyncMachine {
    /// Resolve the remote root and prepare the local one.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Config`] for an invalid configuration
    /// - [`SyncError::InvalidRemoteRoot`] when the remote root is missing or
    ///   not a folder
    pub async fn connect(
        config: &CoreConfig,
        repository: Arc<dyn RemoteRepository>,
        store: Arc<dyn MetadataStore>,
        events: Option<EventBus>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| SyncError::Config(e.to_string()))?;
        let fs = config
            .file_system()
            .map_err(|e| SyncError::Config(e.to_string()))?;
        let filter = NameFilter::from_settings(&config.sync)?;

        let remote_root = normalize_remote_root(&config.remote_root);
        let root = match repository.get_object_by_path(&remote_root).await {
            Ok(RemoteObject::Folder(folder)) => folder,
            Ok(_) => {
                return Err(SyncError::InvalidRemoteRoot {
                    path: remote_root,
                    reason: "not a folder".to_string(),
                })
            }
            Err(e) if e.is_not_found() => {
                return Err(SyncError::InvalidRemoteRoot {
                    path: remote_root,
                    reason: "does not exist".to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        fs.create_dir_all(&config.local_root).await?;

        let span = sync_span(&config.local_root.display().to_string(), &remote_root);
        info!(
            parent: &span,
            remote_root_id = %root.id,
            workers = config.sync.worker_count,
            "Sync root connected"
        );

        Ok(Self::from_context(SyncContext {
            local_root: config.local_root.clone(),
            remote_root,
            remote_root_id: root.id,
            user_name: config.user_name.clone(),
            settings: config.sync.clone(),
            filter,
            fs,
            repository,
            store,
            clock: Arc::clone(&config.clock),
            events,
            span,
        }))
    }

    pub fn from_context(ctx: SyncContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            pass_lock: Mutex::new(()),
        }
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    /// Whether a pass is currently running.
    pub fn is_busy(&self) -> bool {
        self.pass_lock.try_lock().is_err()
    }

    /// Walk both trees and reconcile every item.
    pub async fn full_sync(&self) -> Result<SyncReport> {
        let _guard = self.acquire()?;
        let pass_id = SyncPassId::new();
        self.started(&pass_id, PassKind::Full);
        let result = self
            .full_pass(&pass_id, PassOutcome::Completed)
            .instrument(self.ctx.span.clone())
            .await;
        self.finished(&pass_id, result)
    }

    /// Reconcile what the remote change log reports since the last pass.
    pub async fn change_log_sync(&self) -> Result<SyncReport> {
        let _guard = self.acquire()?;
        let pass_id = SyncPassId::new();
        self.started(&pass_id, PassKind::ChangeLog);
        let result = self
            .change_log_pass(&pass_id)
            .instrument(self.ctx.span.clone())
            .await;
        self.finished(&pass_id, result)
    }

    /// Reconcile the paths named by buffered filesystem events.
    pub async fn watcher_sync(&self, events: &FsEventQueue) -> Result<SyncReport> {
        let _guard = self.acquire()?;
        let pass_id = SyncPassId::new();
        self.started(&pass_id, PassKind::Watcher);
        let result = self
            .watcher_pass(&pass_id, events)
            .instrument(self.ctx.span.clone())
            .await;
        self.finished(&pass_id, result)
    }

    // ========================================================================
    // Passes
    // ========================================================================

    async fn full_pass(&self, pass_id: &SyncPassId, outcome: PassOutcome) -> Result<SyncReport> {
        let started = Instant::now();
        let ctx = &self.ctx;
        let span = ctx.span.clone();
        let server_token = ctx.repository.latest_change_log_token().await?;

        let deps = Arc::new(ItemsDependencies::new());
        let buffer = Arc::new(RemoteBuffer::new(ctx.settings.fold_case_collisions));
        let local_queue = WorkQueue::bounded(ctx.settings.queue_capacity);
        let processor_queue = WorkQueue::bounded(ctx.settings.queue_capacity);

        let remote_task = task::spawn(
            RemoteCrawler::new(Arc::clone(ctx), Arc::clone(&deps), Arc::clone(&buffer))
                .run()
                .instrument(span.clone()),
        );
        let local_task = task::spawn(
            LocalCrawler::new(Arc::clone(ctx), Arc::clone(&deps))
                .run(local_queue.clone())
                .instrument(span.clone()),
        );
        let processor_task = task::spawn(
            TripletProcessor::new(Arc::clone(ctx), Arc::clone(&deps))
                .run(processor_queue.clone())
                .instrument(span),
        );

        let mut assembler = Assembler::with_buffer(Arc::clone(ctx), Arc::clone(&deps), Arc::clone(&buffer));
        let assembled = assemble_full(
            &mut assembler,
            &local_queue,
            &processor_queue,
            local_task,
            remote_task,
        )
        .await;

        processor_queue.close();
        let processed = processor_task.await;
        buffer.clear().await;
        deps.clear();

        let (local, remote) = assembled?;
        let tally = processed??;
        debug!(?local, ?remote, assembly = ?assembler.stats(), "Full pass stages finished");

        if let Some(token) = server_token {
            ctx.store.set_change_log_token(Some(&token)).await?;
        }
        Ok(SyncReport::new(
            pass_id.clone(),
            PassKind::Full,
            outcome,
            tally,
            started.elapsed(),
        ))
    }

    async fn change_log_pass(&self, pass_id: &SyncPassId) -> Result<SyncReport> {
        let started = Instant::now();
        let ctx = &self.ctx;
        let deps = Arc::new(ItemsDependencies::new());
        let change_log = ChangeLogProcessor::new(Arc::clone(ctx), Arc::clone(&deps));

        let (local_token, server_token) = match change_log.start().await? {
            ChangeLogStart::AlreadySynchronized => {
                info!("Already synchronized");
                ctx.emit_core(CoreEvent::Sync(SyncEvent::AlreadySynchronized {
                    pass_id: pass_id.to_string(),
                }));
                return Ok(SyncReport::already_synchronized(pass_id.clone(), started.elapsed()));
            }
            ChangeLogStart::FullSyncRequired(reason) => return self.fall_back(pass_id, reason).await,
            ChangeLogStart::Incremental {
                local_token,
                server_token,
            } => (local_token, server_token),
        };

        let queue = WorkQueue::bounded(ctx.settings.queue_capacity);
        let processor_task = task::spawn(
            TripletProcessor::new(Arc::clone(ctx), Arc::clone(&deps))
                .run(queue.clone())
                .instrument(ctx.span.clone()),
        );
        let outcome = change_log.run(&local_token, queue).await;
        let tally = processor_task.await??;

        match outcome? {
            ChangeLogOutcome::Completed { emitted } => {
                ctx.store.set_change_log_token(Some(&server_token)).await?;
                debug!(emitted, token = %server_token, "Change-log token advanced");
                Ok(SyncReport::new(
                    pass_id.clone(),
                    PassKind::ChangeLog,
                    PassOutcome::Completed,
                    tally,
                    started.elapsed(),
                ))
            }
            ChangeLogOutcome::FullSyncRequired(reason) => self.fall_back(pass_id, reason).await,
        }
    }

    async fn fall_back(&self, pass_id: &SyncPassId, reason: String) -> Result<SyncReport> {
        info!(reason = %reason, "Falling back to a full pass");
        self.ctx.emit_core(CoreEvent::Sync(SyncEvent::FallbackToFullSync {
            pass_id: pass_id.to_string(),
            reason,
        }));
        self.full_pass(pass_id, PassOutcome::FellBackToFullSync).await
    }

    async fn watcher_pass(&self, pass_id: &SyncPassId, events: &FsEventQueue) -> Result<SyncReport> {
        let started = Instant::now();
        let ctx = &self.ctx;
        let span = ctx.span.clone();
        let deps = Arc::new(ItemsDependencies::new());
        let local_queue: WorkQueue<SyncTriplet> = WorkQueue::bounded(ctx.settings.queue_capacity);
        let processor_queue = WorkQueue::bounded(ctx.settings.queue_capacity);

        let processor_task = task::spawn(
            TripletProcessor::new(Arc::clone(ctx), Arc::clone(&deps))
                .run(processor_queue.clone())
                .instrument(span.clone()),
        );
        let watcher_task = {
            let watcher = WatcherProcessor::new(Arc::clone(ctx), Arc::clone(&deps));
            let events = events.clone();
            let out = local_queue.clone();
            task::spawn(async move { watcher.run(&events, out).await }.instrument(span))
        };

        let mut assembler = Assembler::direct(Arc::clone(ctx), Arc::clone(&deps));
        let assembled = assembler.assemble(&local_queue, &processor_queue).await;
        if assembled.is_err() {
            local_queue.close();
        }
        let watched = watcher_task.await;
        processor_queue.close();
        let processed = processor_task.await;

        let stats = watched??;
        assembled?;
        let tally = processed??;
        debug!(?stats, "Watcher pass stages finished");

        Ok(SyncReport::new(
            pass_id.clone(),
            PassKind::Watcher,
            PassOutcome::Completed,
            tally,
            started.elapsed(),
        ))
    }

    // ========================================================================
    // Bookkeeping
    // ========================================================================

    fn acquire(&self) -> Result<MutexGuard<'_, ()>> {
        self.pass_lock.try_lock().map_err(|_| {
            warn!(parent: &self.ctx.span, "Sync pass requested while another is running");
            SyncError::SyncInProgress
        })
    }

    fn started(&self, pass_id: &SyncPassId, kind: PassKind) {
        info!(parent: &self.ctx.span, pass_id = %pass_id, %kind, "Sync pass started");
        self.ctx.emit_core(CoreEvent::Sync(SyncEvent::Started {
            pass_id: pass_id.to_string(),
            kind,
        }));
    }

    fn finished(&self, pass_id: &SyncPassId, result: Result<SyncReport>) -> Result<SyncReport> {
        match &result {
            Ok(report) => {
                info!(
                    parent: &self.ctx.span,
                    pass_id = %pass_id,
                    kind = %report.kind,
                    outcome = ?report.outcome,
                    succeeded = report.succeeded,
                    failed = report.failed,
                    conflicts = report.conflicts,
                    skipped = report.skipped,
                    duration_ms = report.duration.as_millis() as u64,
                    "Sync pass completed"
                );
                if report.outcome != PassOutcome::AlreadySynchronized {
                    self.ctx.emit_core(CoreEvent::Sync(SyncEvent::Completed {
                        pass_id: pass_id.to_string(),
                        kind: report.kind,
                        succeeded: report.succeeded,
                        failed: report.failed,
                        conflicts: report.conflicts,
                        skipped: report.skipped,
                        duration_ms: report.duration.as_millis() as u64,
                    }));
                }
            }
            Err(e) => {
                warn!(parent: &self.ctx.span, pass_id = %pass_id, error = %e, "Sync pass failed");
                self.ctx.emit_core(CoreEvent::Sync(SyncEvent::Failed {
                    pass_id: pass_id.to_string(),
                    message: e.to_string(),
                }));
            }
        }
        result
    }
}

/// Assemble the local stream, then settle with the remote crawl.
async fn assemble_full(
    assembler: &mut Assembler,
    local_queue: &WorkQueue<SyncTriplet>,
    processor_queue: &WorkQueue<SyncTriplet>,
    local_task: JoinHandle<Result<LocalCrawlStats>>,
    remote_task: JoinHandle<Result<RemoteCrawlStats>>,
) -> Result<(LocalCrawlStats, RemoteCrawlStats)> {
    let assembled = assembler.assemble(local_queue, processor_queue).await;
    if assembled.is_err() {
        // Unblocks a crawler waiting on a full queue.
        local_queue.close();
    }

    let local = match (assembled, local_task.await) {
        (Ok(()), Ok(Ok(stats))) => stats,
        (Err(e), _) | (Ok(()), Ok(Err(e))) => {
            remote_task.abort();
            return Err(e);
        }
        (Ok(()), Err(e)) => {
            remote_task.abort();
            return Err(e.into());
        }
    };

    let remote = assembler.finish(remote_task, processor_queue).await?;
    Ok((local, remote))
}

fn normalize_remote_root(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}
