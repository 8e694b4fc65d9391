use core_async::time::Duration;
use core_runtime::events::PassKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of one sync pass, carried by every pass-level event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncPassId(Uuid);

impl SyncPassId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SyncPassId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SyncPassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of one reconciliation operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationResult {
    Succeed,
    Failed,
    /// Both sides diverged; the local copy was preserved under a new name
    /// or the operation was refused.
    Conflict,
    /// Deliberately not attempted this pass (retry ceiling, unresolved
    /// remote state).
    Skipped,
    /// Nothing to do.
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassOutcome {
    Completed,
    AlreadySynchronized,
    /// A change-log pass could not be applied and a full pass ran instead.
    FellBackToFullSync,
}

/// Per-result counters of a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationTally {
    pub succeeded: u64,
    pub failed: u64,
    pub conflicts: u64,
    pub skipped: u64,
    pub unchanged: u64,
}

impl OperationTally {
    pub fn record(&mut self, result: OperationResult) {
        match result {
            OperationResult::Succeed => self.succeeded += 1,
            OperationResult::Failed => self.failed += 1,
            OperationResult::Conflict => self.conflicts += 1,
            OperationResult::Skipped => self.skipped += 1,
            OperationResult::Unchanged => self.unchanged += 1,
        }
    }

    pub fn merge(&mut self, other: OperationTally) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.conflicts += other.conflicts;
        self.skipped += other.skipped;
        self.unchanged += other.unchanged;
    }

    /// Operations that touched anything.
    pub fn operations(&self) -> u64 {
        self.succeeded + self.failed + self.conflicts
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub pass_id: SyncPassId,
    pub kind: PassKind,
    pub outcome: PassOutcome,
    pub succeeded: u64,
    pub failed: u64,
    pub conflicts: u64,
    pub skipped: u64,
    pub unchanged: u64,
    pub duration: Duration,
}

impl SyncReport {
    pub fn new(
        pass_id: SyncPassId,
        kind: PassKind,
        outcome: PassOutcome,
        tally: OperationTally,
        duration: Duration,
    ) -> Self {
        Self {
            pass_id,
            kind,
            outcome,
            succeeded: tally.succeeded,
            failed: tally.failed,
            conflicts: tally.conflicts,
            skipped: tally.skipped,
            unchanged: tally.unchanged,
            duration,
        }
    }

    pub fn already_synchronized(pass_id: SyncPassId, duration: Duration) -> Self {
        Self::new(
            pass_id,
            PassKind::ChangeLog,
            PassOutcome::AlreadySynchronized,
            OperationTally::default(),
            duration,
        )
    }

    /// Operations that changed something or tried to.
    pub fn operations(&self) -> u64 {
        self.succeeded + self.failed + self.conflicts
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.conflicts == 0
    }
}
