//! # Event Bus System
//!
//! Typed, broadcast-based notifications about sync passes and the items
//! they touch. Hosts subscribe to drive status icons, activity feeds or
//! notifications; the engine never waits for a subscriber.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, ItemEvent};
//!
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Item(ItemEvent::Uploaded {
//!         path: "reports/q3.xlsx".to_string(),
//!     }))
//!     .ok();
//!
//! assert!(matches!(stream.try_recv(), Ok(CoreEvent::Item(_))));
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   This is non-fatal; the subscriber can continue receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.
//!
//! Emission is best-effort: publishers call `emit(..).ok()` since having no
//! subscriber is normal.

use core_async::sync::broadcast;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use core_async::sync::broadcast::error::{RecvError, SendError};
pub use core_async::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published through the event bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Pass-level events
    Sync(SyncEvent),
    /// Per-item outcomes
    Item(ItemEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Item(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Item(ItemEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Item(ItemEvent::Conflict { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::FallbackToFullSync { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::Completed { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Sync Events
// ============================================================================

/// Kind of sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PassKind {
    /// Full local and remote tree walk.
    Full,
    /// Incremental pass driven by the remote change log.
    ChangeLog,
    /// Incremental pass driven by buffered local filesystem events.
    Watcher,
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassKind::Full => f.write_str("full"),
            PassKind::ChangeLog => f.write_str("change-log"),
            PassKind::Watcher => f.write_str("watcher"),
        }
    }
}

/// Events describing sync passes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    Started {
        pass_id: String,
        kind: PassKind,
    },
    /// The remote change-log token matched the stored one; nothing to do.
    AlreadySynchronized {
        pass_id: String,
    },
    /// An incremental pass could not proceed and a full pass takes over.
    FallbackToFullSync {
        pass_id: String,
        reason: String,
    },
    Completed {
        pass_id: String,
        kind: PassKind,
        succeeded: u64,
        failed: u64,
        conflicts: u64,
        skipped: u64,
        duration_ms: u64,
    },
    /// The pass was aborted; state is left for the next pass to correct.
    Failed {
        pass_id: String,
        message: String,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Sync pass started",
            SyncEvent::AlreadySynchronized { .. } => "Already synchronized",
            SyncEvent::FallbackToFullSync { .. } => "Falling back to full sync",
            SyncEvent::Completed { .. } => "Sync pass completed",
            SyncEvent::Failed { .. } => "Sync pass failed",
        }
    }
}

// ============================================================================
// Item Events
// ============================================================================

/// Outcome of reconciling one path. Paths are relative to the sync root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ItemEvent {
    Uploaded {
        path: String,
    },
    Downloaded {
        path: String,
        /// The download restored a local copy that had been deleted or
        /// rejected remotely, rather than fetching a new remote item.
        restored: bool,
    },
    LocalDeleted {
        path: String,
    },
    RemoteDeleted {
        path: String,
    },
    Moved {
        from: String,
        to: String,
        /// The move was applied on the remote side.
        remote: bool,
    },
    Conflict {
        path: String,
        /// Where the losing local copy was moved, if it was kept.
        renamed_to: Option<String>,
    },
    Failed {
        path: String,
        message: String,
    },
}

impl ItemEvent {
    fn description(&self) -> &str {
        match self {
            ItemEvent::Uploaded { .. } => "Uploaded",
            ItemEvent::Downloaded { restored: true, .. } => "Restored from remote",
            ItemEvent::Downloaded { .. } => "Downloaded",
            ItemEvent::LocalDeleted { .. } => "Deleted locally",
            ItemEvent::RemoteDeleted { .. } => "Deleted remotely",
            ItemEvent::Moved { .. } => "Moved",
            ItemEvent::Conflict { .. } => "Conflict",
            ItemEvent::Failed { .. } => "Failed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel.
///
/// Cloning is cheap and every clone publishes into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// A subscriber that falls behind by more than `capacity` events
    /// receives `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Each call creates an independent receiver for all future events.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
