//! The "worth syncing" predicate shared by every crawler.

use crate::error::{Result, SyncError};
use core_runtime::config::SyncSettings;
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Suffix of the temporary files written by atomic local writes.
const PARTIAL_WRITE_SUFFIX: &str = ".sync-partial";

/// Characters the remote repository rejects in names.
const INVALID_NAME_CHARS: &[char] = &['\\', ':', '*', '?', '"', '<', '>', '|'];

/// Decides which names take part in synchronization.
///
/// A relative path is worth syncing only if every one of its segments is.
#[derive(Debug, Clone)]
pub struct NameFilter {
    ignored: GlobSet,
    sync_hidden: bool,
}

impl NameFilter {
    pub fn from_settings(settings: &SyncSettings) -> Result<Self> {
        Self::new(&settings.ignored_patterns, settings.sync_hidden)
    }

    pub fn new<S: AsRef<str>>(patterns: &[S], sync_hidden: bool) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern.as_ref()).map_err(|e| {
                SyncError::Config(format!("invalid ignore pattern {:?}: {e}", pattern.as_ref()))
            })?;
            builder.add(glob);
        }
        let ignored = builder
            .build()
            .map_err(|e| SyncError::Config(format!("invalid ignore patterns: {e}")))?;

        Ok(Self {
            ignored,
            sync_hidden,
        })
    }

    /// Check one path segment.
    pub fn is_worth_syncing_name(&self, name: &str) -> bool {
        if name.is_empty() || name == "." || name == ".." {
            return false;
        }
        if name.ends_with(PARTIAL_WRITE_SUFFIX) {
            return false;
        }
        if !self.sync_hidden && name.starts_with('.') {
            return false;
        }
        if name.contains(INVALID_NAME_CHARS) || name.chars().any(char::is_control) {
            return false;
        }
        if name.ends_with(' ') || name.ends_with('.') {
            return false;
        }
        !self.ignored.is_match(name)
    }

    /// Check a relative `/`-separated path.
    pub fn is_worth_syncing(&self, relative: &str) -> bool {
        !relative.is_empty()
            && relative
                .split('/')
                .all(|segment| self.is_worth_syncing_name(segment))
    }
}
