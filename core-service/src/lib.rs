//! Sync service façade and bootstrap helpers.
//!
//! This crate wires a host-provided [`RemoteRepository`] and a
//! [`CoreConfig`] into a ready [`SyncMachine`] backed by the SQLite metadata
//! store, and runs the periodic watch loop for one sync root. Desktop hosts
//! typically enable the `desktop-shims` feature so the configuration falls
//! back to the native filesystem bridge.
//!
//! ```rust,ignore
//! let service = SyncService::open(config, repository, Some(events)).await?;
//! let cancel = CancellationToken::new();
//! service.run(watcher_queue, Duration::from_secs(30), cancel.clone()).await?;
//! ```

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use bridge_traits::{FsEventQueue, RemoteRepository};
use core_async::sync::CancellationToken;
use core_async::time::{interval, Duration, MissedTickBehavior};
use core_runtime::config::CoreConfig;
use core_runtime::events::EventBus;
use core_store::{create_pool, DatabaseConfig, MetadataStore, SqliteMetadataStore};
use core_sync::{SyncError, SyncMachine, SyncReport};
use tracing::{debug, info, warn};

/// Primary façade exposed to host applications: one sync root.
#[derive(Clone)]
pub struct SyncService {
    machine: Arc<SyncMachine>,
}

impl SyncService {
    /// Open the metadata store at `config.database_path` and connect the
    /// sync root.
    pub async fn open(
        config: CoreConfig,
        repository: Arc<dyn RemoteRepository>,
        events: Option<EventBus>,
    ) -> Result<Self> {
        let fs = config.file_system()?;
        if let Some(parent) = config.database_path.parent() {
            fs.create_dir_all(parent).await.map_err(|err| {
                CoreError::InitializationFailed(format!(
                    "cannot create {}: {err}",
                    parent.display()
                ))
            })?;
        }

        let pool = create_pool(DatabaseConfig::new(&config.database_path)).await?;
        let store: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::new(pool));
        Self::with_store(config, repository, store, events).await
    }

    /// Connect the sync root over an already opened store.
    pub async fn with_store(
        config: CoreConfig,
        repository: Arc<dyn RemoteRepository>,
        store: Arc<dyn MetadataStore>,
        events: Option<EventBus>,
    ) -> Result<Self> {
        let machine = SyncMachine::connect(&config, repository, store, events).await?;
        info!(local_root = %config.local_root.display(), "Sync service ready");
        Ok(Self {
            machine: Arc::new(machine),
        })
    }

    /// The machine behind the service, for hosts that trigger passes
    /// themselves.
    pub fn machine(&self) -> Arc<SyncMachine> {
        Arc::clone(&self.machine)
    }

    pub async fn full_sync(&self) -> Result<SyncReport> {
        Ok(self.machine.full_sync().await?)
    }

    pub async fn change_log_sync(&self) -> Result<SyncReport> {
        Ok(self.machine.change_log_sync().await?)
    }

    /// Run an initial full pass, then on every tick a watcher pass over the
    /// buffered filesystem events followed by a change-log pass, until
    /// `cancel` fires.
    ///
    /// Only the initial pass is fatal. Later failures are logged and left
    /// for the next tick to correct.
    pub async fn run(
        &self,
        fs_events: FsEventQueue,
        period: Duration,
        cancel: CancellationToken,
    ) -> Result<()> {
        self.machine.full_sync().await?;

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; the initial pass covered it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Sync service stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.tick(&fs_events).await;
                }
            }
        }
    }

    async fn tick(&self, fs_events: &FsEventQueue) {
        if !fs_events.is_empty() {
            log_pass("watcher", self.machine.watcher_sync(fs_events).await);
        }
        log_pass("change-log", self.machine.change_log_sync().await);
    }
}

fn log_pass(kind: &str, result: core_sync::Result<SyncReport>) {
    match result {
        Ok(report) => debug!(
            kind,
            outcome = ?report.outcome,
            operations = report.operations(),
            "Scheduled pass finished"
        ),
        Err(SyncError::SyncInProgress) => debug!(kind, "Pass already running; skipping tick"),
        Err(err) => warn!(kind, error = %err, "Scheduled pass failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{
        ContentChanges, FixedClock, ObjectProperties, OperationContext, RemoteDocument,
        RemoteFolder, RemoteObject,
    };
    use bytes::Bytes;
    use core_async::queue::WorkQueue;
    use core_runtime::config::SyncSettings;
    use mockall::mock;
    use tempfile::TempDir;

    mock! {
        Repository {}

        #[async_trait]
        impl RemoteRepository for Repository {
            async fn get_object(&self, id: &str) -> BridgeResult<RemoteObject>;
            async fn get_object_by_path(&self, path: &str) -> BridgeResult<RemoteObject>;
            async fn get_children(
                &self,
                folder_id: &str,
                context: &OperationContext,
            ) -> BridgeResult<Vec<RemoteObject>>;
            async fn get_content_stream(&self, document_id: &str) -> BridgeResult<Bytes>;
            async fn set_content_stream(
                &self,
                document_id: &str,
                content: Bytes,
                overwrite: bool,
            ) -> BridgeResult<RemoteDocument>;
            async fn create_folder(&self, parent_id: &str, name: &str) -> BridgeResult<RemoteFolder>;
            async fn create_document(
                &self,
                parent_id: &str,
                name: &str,
                content: Bytes,
            ) -> BridgeResult<RemoteDocument>;
            async fn move_object(
                &self,
                object_id: &str,
                source_folder_id: &str,
                target_folder_id: &str,
            ) -> BridgeResult<RemoteObject>;
            async fn update_properties(
                &self,
                object_id: &str,
                properties: &ObjectProperties,
            ) -> BridgeResult<RemoteObject>;
            async fn delete_tree(&self, folder_id: &str) -> BridgeResult<()>;
            async fn delete_all_versions(&self, document_id: &str) -> BridgeResult<()>;
            async fn latest_change_log_token(&self) -> BridgeResult<Option<String>>;
            async fn get_content_changes(
                &self,
                token: &str,
                include_properties: bool,
                max_items: u32,
            ) -> BridgeResult<ContentChanges>;
        }
    }

    fn empty_repository() -> MockRepository {
        let mut repository = MockRepository::new();
        repository.expect_get_object_by_path().returning(|path| {
            Ok(RemoteObject::Folder(RemoteFolder {
                id: "root".to_string(),
                name: "docs".to_string(),
                path: path.to_string(),
                parent_id: None,
                last_modified: None,
            }))
        });
        repository
            .expect_get_children()
            .returning(|_, _| Ok(Vec::new()));
        repository
            .expect_latest_change_log_token()
            .returning(|| Ok(Some("7".to_string())));
        repository
    }

    fn config(dir: &TempDir) -> CoreConfig {
        CoreConfig::builder()
            .local_root(dir.path().join("local"))
            .remote_root("/sites/docs")
            .database_path(dir.path().join("state").join("sync.db"))
            .user_name("alice")
            .sync_settings(SyncSettings::default())
            .file_system(Arc::new(bridge_desktop::TokioFileSystem::new()))
            .clock(Arc::new(FixedClock::from_millis(1_700_000_000_000)))
            .build()
            .unwrap()
    }

    #[core_async::test(multi_thread)]
    async fn test_open_creates_store_and_local_root() {
        let dir = TempDir::new().unwrap();
        let service = SyncService::open(config(&dir), Arc::new(empty_repository()), None)
            .await
            .unwrap();

        assert!(dir.path().join("state").join("sync.db").exists());
        assert!(dir.path().join("local").is_dir());
        assert!(!service.machine().is_busy());
    }

    #[core_async::test(multi_thread)]
    async fn test_run_stops_when_cancelled() {
        let dir = TempDir::new().unwrap();
        let service = SyncService::open(config(&dir), Arc::new(empty_repository()), None)
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        service
            .run(WorkQueue::bounded(8), Duration::from_millis(10), cancel)
            .await
            .unwrap();

        // The initial full pass recorded the repository token.
        let report = service.change_log_sync().await.unwrap();
        assert_eq!(report.outcome, core_sync::PassOutcome::AlreadySynchronized);
    }
}
