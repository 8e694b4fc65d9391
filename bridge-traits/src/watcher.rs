//! Filesystem watcher event types.
//!
//! The OS-level watcher is owned by the host. It buffers raw events into a
//! [`WorkQueue`](core_async::queue::WorkQueue) of [`FsEvent`] which the sync
//! core drains on each watcher pass.

use std::path::PathBuf;

/// What happened to a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEventKind {
    Created,
    Changed,
    Deleted,
    /// `path` is the new location, `old_path` the previous one.
    Renamed { old_path: PathBuf },
}

/// One raw filesystem event. Paths are absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub kind: FsEventKind,
    pub path: PathBuf,
}

impl FsEvent {
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: FsEventKind::Created,
            path: path.into(),
        }
    }

    pub fn changed(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: FsEventKind::Changed,
            path: path.into(),
        }
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: FsEventKind::Deleted,
            path: path.into(),
        }
    }

    pub fn renamed(old_path: impl Into<PathBuf>, path: impl Into<PathBuf>) -> Self {
        Self {
            kind: FsEventKind::Renamed {
                old_path: old_path.into(),
            },
            path: path.into(),
        }
    }
}

/// Queue of buffered watcher events shared between the host watcher and the
/// sync core.
pub type FsEventQueue = core_async::queue::WorkQueue<FsEvent>;
