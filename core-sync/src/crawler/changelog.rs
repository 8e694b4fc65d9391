//! # Change-Log Processor
//!
//! Incremental reconciliation from the repository change log.
//!
//! ## Workflow
//!
//! 1. Compare the repository's current token with the stored one
//!    ([`ChangeLogProcessor::start`]); equal tokens mean nothing to do, a
//!    missing stored token means a full pass is required
//! 2. Page through events from the stored token, coalescing create noise
//!    ([`ChangeBuffer`])
//! 3. Resolve the latest event of every object into a triplet, or into a
//!    request for a full pass
//!
//! Triplets are only queued once every event resolved, so a fallback never
//! leaves half of a change log applied.

use super::{emit, register_triplet};
use crate::context::SyncContext;
use crate::dependencies::ItemsDependencies;
use crate::error::Result;
use crate::items::RemoteStorageItem;
use crate::triplet::{RecordLookup, SyncTriplet, TripletFactory, TripletOrigin};
use bridge_traits::{ChangeEvent, ChangeType};
use chrono::Duration as ChronoDuration;
use core_async::queue::WorkQueue;
use core_async::time::Duration;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Where an incremental pass starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeLogStart {
    AlreadySynchronized,
    FullSyncRequired(String),
    Incremental {
        local_token: String,
        server_token: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeLogOutcome {
    Completed { emitted: usize },
    FullSyncRequired(String),
}

// ============================================================================
// Coalescing
// ============================================================================

/// Retained change events, in arrival order.
///
/// An update of an object arriving within `window` of that object's create
/// is the tail of the create and is dropped.
#[derive(Debug, Clone)]
pub struct ChangeBuffer {
    window: ChronoDuration,
    events: Vec<ChangeEvent>,
}

impl ChangeBuffer {
    pub fn new(window: Duration) -> Self {
        Self {
            window: ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::zero()),
            events: Vec::new(),
        }
    }

    /// Add an event; returns whether it was retained.
    pub fn push(&mut self, event: ChangeEvent) -> bool {
        if event.change_type == ChangeType::Updated {
            let previous = self
                .events
                .iter()
                .rev()
                .find(|e| e.object_id == event.object_id);
            if let Some(previous) = previous {
                let gap = event.change_time - previous.change_time;
                if previous.change_type == ChangeType::Created
                    && gap >= ChronoDuration::zero()
                    && gap <= self.window
                {
                    debug!(object_id = %event.object_id, "Dropping update that follows its create");
                    return false;
                }
            }
        }
        self.events.push(event);
        true
    }

    pub fn events(&self) -> &[ChangeEvent] {
        &self.events
    }

    /// The last retained event of every object, ordered by first appearance.
    pub fn latest_per_object(&self) -> Vec<&ChangeEvent> {
        let mut order: Vec<&str> = Vec::new();
        let mut latest: HashMap<&str, &ChangeEvent> = HashMap::new();
        for event in &self.events {
            if latest.insert(&event.object_id, event).is_none() {
                order.push(&event.object_id);
            }
        }
        order
            .into_iter()
            .filter_map(|id| latest.get(id).copied())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

// ============================================================================
// Processor
// ============================================================================

enum Resolution {
    Emit(SyncTriplet),
    FullSyncRequired(String),
    Ignore,
}

pub struct ChangeLogProcessor {
    ctx: Arc<SyncContext>,
    deps: Arc<ItemsDependencies>,
    factory: TripletFactory,
}

impl ChangeLogProcessor {
    pub fn new(ctx: Arc<SyncContext>, deps: Arc<ItemsDependencies>) -> Self {
        let factory = TripletFactory::new(Arc::clone(&ctx));
        Self { ctx, deps, factory }
    }

    /// Fetch and compare tokens. Makes exactly one repository call.
    #[instrument(skip_all)]
    pub async fn start(&self) -> Result<ChangeLogStart> {
        let server = self.ctx.repository.latest_change_log_token().await?;
        let local = self.ctx.store.change_log_token().await?;

        let start = match (local, server) {
            (_, None) => {
                ChangeLogStart::FullSyncRequired("repository has no change log".to_string())
            }
            (None, Some(_)) => {
                ChangeLogStart::FullSyncRequired("no change-log token recorded".to_string())
            }
            (Some(local), Some(server)) if local == server => ChangeLogStart::AlreadySynchronized,
            (Some(local_token), Some(server_token)) => ChangeLogStart::Incremental {
                local_token,
                server_token,
            },
        };
        debug!(?start, "Compared change-log tokens");
        Ok(start)
    }

    /// Read the change log from `local_token` into `out`, then close it.
    #[instrument(skip(self, out))]
    pub async fn run(&self, local_token: &str, out: WorkQueue<SyncTriplet>) -> Result<ChangeLogOutcome> {
        let result = self.process(local_token, &out).await;
        out.close();
        result
    }

    async fn process(&self, local_token: &str, out: &WorkQueue<SyncTriplet>) -> Result<ChangeLogOutcome> {
        let Some(buffer) = self.read_changes(local_token).await? else {
            return Ok(ChangeLogOutcome::FullSyncRequired(
                "change log too old to paginate".to_string(),
            ));
        };

        let mut triplets = Vec::new();
        let mut names = HashSet::new();
        for event in buffer.latest_per_object() {
            match self.resolve(event).await? {
                Resolution::Emit(triplet) => {
                    if names.insert(triplet.name().to_string()) {
                        triplets.push(triplet);
                    }
                }
                Resolution::FullSyncRequired(reason) => {
                    info!(reason = %reason, "Change log cannot be applied incrementally");
                    return Ok(ChangeLogOutcome::FullSyncRequired(reason));
                }
                Resolution::Ignore => {}
            }
        }

        let emitted = triplets.len();
        // Register everything first so parent edges exist before any item
        // can run.
        for triplet in &triplets {
            register_triplet(&self.deps, triplet);
        }
        for triplet in triplets {
            emit(&self.deps, out, triplet).await?;
        }

        info!(events = buffer.len(), emitted, "Change log processed");
        Ok(ChangeLogOutcome::Completed { emitted })
    }

    /// Page through the change log. `None` when the repository has more
    /// pages but no token to continue from.
    async fn read_changes(&self, local_token: &str) -> Result<Option<ChangeBuffer>> {
        let mut buffer = ChangeBuffer::new(self.ctx.settings.coalesce_window);
        let mut token = local_token.to_string();

        loop {
            let page = self
                .ctx
                .repository
                .get_content_changes(&token, true, self.ctx.settings.max_change_log_page_size)
                .await?;
            debug!(events = page.events.len(), has_more = page.has_more, "Read change-log page");

            for event in page.events {
                buffer.push(event);
            }
            if !page.has_more {
                return Ok(Some(buffer));
            }
            match page.next_token {
                Some(next) if next != token => token = next,
                _ => {
                    warn!("Repository reports more changes without a continuation token");
                    return Ok(None);
                }
            }
        }
    }

    async fn resolve(&self, event: &ChangeEvent) -> Result<Resolution> {
        let object = match self.ctx.repository.get_object(&event.object_id).await {
            Ok(object) => object,
            Err(e) if e.is_not_found() => {
                if event.change_type != ChangeType::Deleted {
                    return Ok(Resolution::Ignore);
                }
                return self.resolve_deleted(&event.object_id).await;
            }
            Err(e) => return Err(e.into()),
        };

        if !object.is_supported() {
            return Ok(Resolution::Ignore);
        }
        let in_scope = object
            .path()
            .and_then(|path| self.ctx.remote_relative(path))
            .filter(|relative| self.ctx.filter.is_worth_syncing(relative));
        let Some(relative) = in_scope else {
            // Moved out of the synchronized subtree: gone as far as we care.
            return self.resolve_deleted(&event.object_id).await;
        };

        if event.change_type == ChangeType::Updated {
            return Ok(Resolution::FullSyncRequired(format!(
                "{relative} was updated remotely"
            )));
        }

        let remote = RemoteStorageItem::present(self.ctx.remote_root.clone(), relative, object);
        let triplet = self
            .factory
            .from_remote(remote, RecordLookup::ByRemoteId, TripletOrigin::ChangeLog)
            .await?;
        Ok(Resolution::Emit(triplet))
    }

    async fn resolve_deleted(&self, object_id: &str) -> Result<Resolution> {
        let Some(record) = self.ctx.store.find_by_remote_id(object_id).await? else {
            debug!(object_id, "Deleted object was never synchronized");
            return Ok(Resolution::Ignore);
        };

        let remote = RemoteStorageItem::absent(self.ctx.remote_root.clone(), record.remote_path());
        let triplet = self
            .factory
            .from_record(record, Some(remote), TripletOrigin::ChangeLog)
            .await?;
        Ok(Resolution::Emit(triplet))
    }
}
