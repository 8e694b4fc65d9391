//! Workspace umbrella crate.
//!
//! Host applications depend on `docsync-workspace` and get the sync service
//! façade with the desktop filesystem bridge wired in, instead of pulling
//! `core-service`, `core-sync` and `bridge-desktop` individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::{CoreError, SyncService};
