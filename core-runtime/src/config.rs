//! # Core Configuration Module
//!
//! Configuration for one sync root.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a
//! `CoreConfig` holding the roots, the metadata store location and the
//! reconciliation tuning in [`SyncSettings`]. Validation is fail-fast: an
//! invalid value is rejected at `build()` time with an actionable message
//! instead of surfacing halfway through a sync pass.
//!
//! ## Optional Dependencies (with platform defaults)
//!
//! - `FileSystemAccess` - Local file I/O (desktop default: tokio fs)
//! - `Clock` - Time source (default: system clock)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, SyncSettings};
//!
//! let config = CoreConfig::builder()
//!     .local_root("/home/me/Documents/Sites")
//!     .remote_root("/Sites/marketing/documentLibrary")
//!     .database_path("/home/me/.local/share/docsync/marketing.db")
//!     .user_name("me")
//!     .sync_settings(SyncSettings::default().with_worker_count(8))
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! // Missing local root
//! let config = CoreConfig::builder()
//!     .remote_root("/Sites/docs")
//!     .database_path("/tmp/sync.db")
//!     .build()
//!     .expect("Should fail - missing local root");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, FileSystemAccess, SystemClock};
use core_async::time::Duration;
use std::path::PathBuf;
use std::sync::Arc;

/// Name patterns that are never worth syncing: editor swap files, office
/// lock files, OS metadata.
pub const DEFAULT_IGNORED_PATTERNS: &[&str] = &[
    "*~",
    "~$*",
    "*.tmp",
    "*.swp",
    "*.part",
    ".~lock.*#",
    "Thumbs.db",
    "desktop.ini",
    ".DS_Store",
];

/// Reconciliation tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Number of concurrent workers in the triplet processor.
    pub worker_count: usize,

    /// Bound of every queue between pipeline stages.
    pub queue_capacity: usize,

    /// `maxItems` requested per change-log page.
    pub max_change_log_page_size: u32,

    /// Children requested per page when listing remote folders.
    pub children_page_size: u32,

    /// Failed downloads of one path after which further attempts are skipped.
    pub max_download_retries: u32,

    /// Treat remote names that differ only by case as colliding.
    pub fold_case_collisions: bool,

    /// Debounce applied to ambiguous watcher renames and deletes.
    pub grace_delay: Duration,

    /// An Updated change-log event this soon after a Created event for the
    /// same object is dropped as noise.
    pub coalesce_window: Duration,

    /// Glob patterns (matched against the file name) never worth syncing.
    pub ignored_patterns: Vec<String>,

    /// Sync dot-files.
    pub sync_hidden: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 256,
            max_change_log_page_size: 100,
            children_page_size: 1000,
            max_download_retries: 5,
            fold_case_collisions: false,
            grace_delay: Duration::from_millis(500),
            coalesce_window: Duration::from_millis(500),
            ignored_patterns: DEFAULT_IGNORED_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            sync_hidden: false,
        }
    }
}

impl SyncSettings {
    pub fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_max_change_log_page_size(mut self, size: u32) -> Self {
        self.max_change_log_page_size = size;
        self
    }

    pub fn with_max_download_retries(mut self, retries: u32) -> Self {
        self.max_download_retries = retries;
        self
    }

    pub fn with_fold_case_collisions(mut self, fold: bool) -> Self {
        self.fold_case_collisions = fold;
        self
    }

    pub fn with_grace_delay(mut self, delay: Duration) -> Self {
        self.grace_delay = delay;
        self
    }

    pub fn with_coalesce_window(mut self, window: Duration) -> Self {
        self.coalesce_window = window;
        self
    }

    pub fn with_ignored_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sync_hidden(mut self, sync_hidden: bool) -> Self {
        self.sync_hidden = sync_hidden;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::Config(
                "Worker count must be greater than 0".to_string(),
            ));
        }

        if self.worker_count > 64 {
            return Err(Error::Config(
                "Worker count exceeds maximum of 64".to_string(),
            ));
        }

        if self.queue_capacity == 0 {
            return Err(Error::Config(
                "Queue capacity must be greater than 0".to_string(),
            ));
        }

        if self.max_change_log_page_size == 0 {
            return Err(Error::Config(
                "Change-log page size must be greater than 0".to_string(),
            ));
        }

        if self.children_page_size == 0 {
            return Err(Error::Config(
                "Children page size must be greater than 0".to_string(),
            ));
        }

        if self.grace_delay > Duration::from_secs(60) {
            return Err(Error::Config(
                "Grace delay exceeds maximum of 60 seconds".to_string(),
            ));
        }

        if let Some(empty) = self.ignored_patterns.iter().find(|p| p.trim().is_empty()) {
            return Err(Error::Config(format!(
                "Ignored pattern {:?} is empty",
                empty
            )));
        }

        Ok(())
    }
}

/// Configuration of one sync root.
#[derive(Clone)]
pub struct CoreConfig {
    /// Local directory being synchronised.
    pub local_root: PathBuf,

    /// Absolute repository path of the remote root folder.
    pub remote_root: String,

    /// Path to the SQLite metadata store.
    pub database_path: PathBuf,

    /// Name embedded in conflict copies (`report_alice_20240501103000.txt`).
    pub user_name: String,

    pub sync: SyncSettings,

    /// File system access abstraction (optional with desktop default)
    pub file_system: Option<Arc<dyn FileSystemAccess>>,

    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("local_root", &self.local_root)
            .field("remote_root", &self.remote_root)
            .field("database_path", &self.database_path)
            .field("user_name", &self.user_name)
            .field("sync", &self.sync)
            .field(
                "file_system",
                &self
                    .file_system
                    .as_ref()
                    .map(|_| "FileSystemAccess { ... }"),
            )
            .finish_non_exhaustive()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.local_root.as_os_str().is_empty() {
            return Err(Error::Config("Local root cannot be empty".to_string()));
        }

        if !self.local_root.is_absolute() {
            return Err(Error::Config(format!(
                "Local root must be an absolute path, got {}",
                self.local_root.display()
            )));
        }

        if !self.remote_root.starts_with('/') {
            return Err(Error::Config(format!(
                "Remote root must be an absolute repository path, got {:?}",
                self.remote_root
            )));
        }

        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.database_path.starts_with(&self.local_root) {
            return Err(Error::Config(
                "Database path must not live inside the local root".to_string(),
            ));
        }

        if self.user_name.trim().is_empty() {
            return Err(Error::Config("User name cannot be empty".to_string()));
        }

        self.sync.validate()
    }

    /// The configured file system, or the platform default.
    pub fn file_system(&self) -> Result<Arc<dyn FileSystemAccess>> {
        match &self.file_system {
            Some(fs) => Ok(fs.clone()),
            None => provide_default_file_system(),
        }
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    Ok(Arc::new(bridge_desktop::TokioFileSystem::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    Err(Error::CapabilityMissing {
        capability: "FileSystemAccess".to_string(),
        message: "FileSystemAccess implementation is required to read the local root. \
                 Desktop: enable the 'desktop-shims' feature to use TokioFileSystem. \
                 Other hosts: inject a FileSystemAccess through .file_system()."
            .to_string(),
    })
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    local_root: Option<PathBuf>,
    remote_root: Option<String>,
    database_path: Option<PathBuf>,
    user_name: Option<String>,
    sync: Option<SyncSettings>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    clock: Option<Arc<dyn Clock>>,
}

impl CoreConfigBuilder {
    pub fn local_root<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.local_root = Some(path.into());
        self
    }

    /// Sets the remote root. A trailing `/` is stripped.
    pub fn remote_root(mut self, path: impl Into<String>) -> Self {
        self.remote_root = Some(path.into());
        self
    }

    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Default: the `USER` / `USERNAME` environment variable, else `"user"`.
    pub fn user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = Some(name.into());
        self
    }

    pub fn sync_settings(mut self, settings: SyncSettings) -> Self {
        self.sync = Some(settings);
        self
    }

    /// Sets the file system access implementation.
    ///
    /// If not provided, the desktop default (tokio fs-based) will be used when
    /// the `desktop-shims` feature is enabled.
    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds the final `CoreConfig` instance.
    pub fn build(self) -> Result<CoreConfig> {
        let local_root = self.local_root.ok_or_else(|| {
            Error::Config("Local root is required. Use .local_root() to set it.".to_string())
        })?;

        let remote_root = self.remote_root.ok_or_else(|| {
            Error::Config("Remote root is required. Use .remote_root() to set it.".to_string())
        })?;

        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let user_name = self
            .user_name
            .or_else(|| std::env::var("USER").ok())
            .or_else(|| std::env::var("USERNAME").ok())
            .unwrap_or_else(|| "user".to_string());

        let remote_root = match remote_root.trim_end_matches('/') {
            "" => "/".to_string(),
            trimmed => trimmed.to_string(),
        };

        let config = CoreConfig {
            local_root,
            remote_root,
            database_path,
            user_name,
            sync: self.sync.unwrap_or_default(),
            file_system: self.file_system,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        };

        config.validate()?;

        Ok(config)
    }
}
