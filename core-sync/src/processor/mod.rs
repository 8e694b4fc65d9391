//! # Triplet Processor
//!
//! A fixed pool of workers drains the processor queue. For every triplet a
//! worker:
//!
//! 1. classifies it into a [`SyncAction`]
//! 2. parks it and asks the dependency tracker for ownership with the
//!    ordering the action needs
//! 3. if granted, runs it; afterwards completes it in the tracker and runs
//!    whatever that released, on the same worker
//!
//! A deferred triplet stays parked until some other worker's completion
//! releases it, so a blocked item never stalls its worker. Closing the queue
//! is the end-of-input signal; once all workers are idle any item still
//! deferred is released and run.

mod classify;
mod operations;

pub use classify::{classify, SyncAction};
pub use operations::WorkerOperations;

use crate::context::SyncContext;
use crate::dependencies::ItemsDependencies;
use crate::error::Result;
use crate::report::OperationTally;
use crate::triplet::SyncTriplet;
use core_async::queue::WorkQueue;
use core_async::task::JoinSet;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, Instrument};

struct Parked {
    triplet: SyncTriplet,
    action: SyncAction,
}

pub struct TripletProcessor {
    ctx: Arc<SyncContext>,
    deps: Arc<ItemsDependencies>,
    operations: WorkerOperations,
    parked: DashMap<String, Parked>,
}

impl TripletProcessor {
    pub fn new(ctx: Arc<SyncContext>, deps: Arc<ItemsDependencies>) -> Self {
        let operations = WorkerOperations::new(Arc::clone(&ctx));
        Self {
            ctx,
            deps,
            operations,
            parked: DashMap::new(),
        }
    }

    /// Drain `queue` until it is closed and empty.
    #[instrument(skip_all, fields(workers = self.ctx.settings.worker_count))]
    pub async fn run(self, queue: WorkQueue<SyncTriplet>) -> Result<OperationTally> {
        let processor = Arc::new(self);
        let span = processor.ctx.span.clone();

        let mut workers = JoinSet::new();
        for worker in 0..processor.ctx.settings.worker_count {
            let processor = Arc::clone(&processor);
            let queue = queue.clone();
            workers.spawn(async move { processor.worker(worker, queue).await }.instrument(span.clone()));
        }

        let mut tally = OperationTally::default();
        while let Some(joined) = workers.join_next().await {
            tally.merge(joined?);
        }

        let leftovers = processor.deps.release_deferred();
        if !leftovers.is_empty() {
            processor.run_chain(leftovers, &mut tally).await;
        }

        let stranded: Vec<String> = processor.parked.iter().map(|e| e.key().clone()).collect();
        if !stranded.is_empty() {
            error!(count = stranded.len(), "Items parked without ever being released");
            processor.run_chain(stranded, &mut tally).await;
        }

        info!(
            succeeded = tally.succeeded,
            failed = tally.failed,
            conflicts = tally.conflicts,
            skipped = tally.skipped,
            unchanged = tally.unchanged,
            "Processor drained"
        );
        Ok(tally)
    }

    async fn worker(&self, worker: usize, queue: WorkQueue<SyncTriplet>) -> OperationTally {
        let mut tally = OperationTally::default();
        while let Some(triplet) = queue.pop().await {
            let action = classify(&triplet);
            let order = action.dependency_order(triplet.is_folder());
            let name = triplet.name().to_string();
            debug!(worker, item = %name, %action, ?order, "Classified");

            self.parked.insert(name.clone(), Parked { triplet, action });
            let acquisition = self.deps.try_acquire(&name, order);

            let mut ready = acquisition.woken;
            if acquisition.ready {
                ready.push(name);
            }
            self.run_chain(ready, &mut tally).await;
        }
        debug!(worker, "Worker finished");
        tally
    }

    /// Run owned items and everything their completion releases.
    async fn run_chain(&self, mut stack: Vec<String>, tally: &mut OperationTally) {
        while let Some(name) = stack.pop() {
            let Some((_, parked)) = self.parked.remove(&name) else {
                debug!(item = %name, "Released item has no queued triplet");
                stack.extend(self.deps.complete(&name));
                continue;
            };

            let result = self.operations.execute(&parked.triplet, parked.action).await;
            tally.record(result);
            stack.extend(self.deps.complete(&name));
        }
    }
}
