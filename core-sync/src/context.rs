//! Shared, read-only state of one sync root.
//!
//! Every crawler, the assembler and every worker receive an
//! `Arc<SyncContext>`. It is built once when the [`SyncMachine`] connects
//! and never mutated afterwards.
//!
//! [`SyncMachine`]: crate::machine::SyncMachine

use crate::filter::NameFilter;
use bridge_traits::{Clock, FileSystemAccess, RemoteRepository};
use core_runtime::config::SyncSettings;
use core_runtime::events::{CoreEvent, EventBus, ItemEvent};
use core_store::MetadataStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Span;

pub struct SyncContext {
    pub local_root: PathBuf,
    /// Absolute repository path of the remote root, without trailing `/`
    /// unless it is the repository root itself.
    pub remote_root: String,
    pub remote_root_id: String,
    pub user_name: String,
    pub settings: SyncSettings,
    pub filter: NameFilter,
    pub fs: Arc<dyn FileSystemAccess>,
    pub repository: Arc<dyn RemoteRepository>,
    pub store: Arc<dyn MetadataStore>,
    pub clock: Arc<dyn Clock>,
    pub events: Option<EventBus>,
    /// Span every pass and spawned task runs in.
    pub span: Span,
}

impl SyncContext {
    pub fn local_full_path(&self, relative: &str) -> PathBuf {
        if relative.is_empty() {
            return self.local_root.clone();
        }
        relative
            .split('/')
            .fold(self.local_root.clone(), |path, segment| path.join(segment))
    }

    /// Relative `/`-separated path of a local absolute path, `None` when the
    /// path is the root itself or lies outside it.
    pub fn local_relative(&self, full: &Path) -> Option<String> {
        let stripped = full.strip_prefix(&self.local_root).ok()?;
        let segments: Vec<String> = stripped
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if segments.is_empty() {
            None
        } else {
            Some(segments.join("/"))
        }
    }

    pub fn remote_full_path(&self, relative: &str) -> String {
        if relative.is_empty() {
            self.remote_root.clone()
        } else if self.remote_root == "/" {
            format!("/{relative}")
        } else {
            format!("{}/{relative}", self.remote_root)
        }
    }

    /// Relative path of an absolute repository path, `None` when the path is
    /// the root itself or outside the synchronized subtree.
    pub fn remote_relative(&self, full: &str) -> Option<String> {
        let rest = if self.remote_root == "/" {
            full.strip_prefix('/')?
        } else {
            full.strip_prefix(self.remote_root.as_str())?.strip_prefix('/')?
        };
        let rest = rest.trim_end_matches('/');
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }

    pub fn emit(&self, event: ItemEvent) {
        if let Some(bus) = &self.events {
            bus.emit(CoreEvent::Item(event)).ok();
        }
    }

    pub fn emit_core(&self, event: CoreEvent) {
        if let Some(bus) = &self.events {
            bus.emit(event).ok();
        }
    }
}

/// Parent of a relative path, `None` for top-level entries.
pub fn parent_of(relative: &str) -> Option<&str> {
    relative.rsplit_once('/').map(|(parent, _)| parent)
}

/// Last segment of a relative path.
pub fn file_name(relative: &str) -> &str {
    relative
        .rsplit_once('/')
        .map(|(_, name)| name)
        .unwrap_or(relative)
}

pub fn join_relative(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_helpers() {
        assert_eq!(parent_of("a/b/c.txt"), Some("a/b"));
        assert_eq!(parent_of("c.txt"), None);
        assert_eq!(file_name("a/b/c.txt"), "c.txt");
        assert_eq!(file_name("c.txt"), "c.txt");
        assert_eq!(join_relative("", "x"), "x");
        assert_eq!(join_relative("a", "x"), "a/x");
    }
}
