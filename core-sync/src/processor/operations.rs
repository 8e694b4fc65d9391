//! # Worker Operations
//!
//! Side effects of every [`SyncAction`], and the bookkeeping in the
//! metadata store that makes the next pass see the item as reconciled.
//!
//! ## Error boundary
//!
//! Operations return `Result` internally; [`WorkerOperations::execute`] is
//! the boundary that turns any error into an [`OperationResult`]:
//!
//! - Permission denied: the record is dropped so the item stops being
//!   treated as ours, then `Failed`
//! - Name constraint and everything else: `Failed`, retried next pass
//!
//! Checked-out documents never reach the boundary: the operation falls back
//! to restoring the remote version locally.

use super::classify::SyncAction;
use crate::context::{file_name, parent_of, SyncContext};
use crate::error::{Result, SyncError};
use crate::items::RemoteStorageItem;
use crate::report::OperationResult;
use crate::triplet::{content_checksum, SyncTriplet};
use bridge_traits::{BridgeError, ObjectProperties, OperationContext, RemoteObject};
use core_runtime::events::ItemEvent;
use core_store::{MappedFile, MappedFolder, MappedObject, ObjectKind, OperationKind};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub struct WorkerOperations {
    ctx: Arc<SyncContext>,
}

impl WorkerOperations {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    /// Run `action` for `triplet`. Never fails; see the module docs.
    #[instrument(skip_all, fields(item = %triplet.name(), action = %action))]
    pub async fn execute(&self, triplet: &SyncTriplet, action: SyncAction) -> OperationResult {
        match self.dispatch(triplet, action).await {
            Ok(result) => {
                debug!(?result, "Operation finished");
                result
            }
            Err(e) => self.fail(triplet, e).await,
        }
    }

    async fn dispatch(&self, triplet: &SyncTriplet, action: SyncAction) -> Result<OperationResult> {
        match action {
            SyncAction::NoOp => Ok(OperationResult::Unchanged),
            SyncAction::Unresolved => {
                debug!("Remote state unknown; skipping this pass");
                Ok(OperationResult::Skipped)
            }
            SyncAction::UploadNew => self.upload_new(triplet).await,
            SyncAction::CreateRemoteFolder => self.create_remote_folder(triplet).await,
            SyncAction::UpdateRemote => self.update_remote(triplet).await,
            SyncAction::Download => self.download(triplet, false).await,
            SyncAction::CreateLocalFolder => self.create_local_folder(triplet, false).await,
            SyncAction::RecordExisting => self.record_existing(triplet).await,
            SyncAction::RestoreRemote => self.restore_remote(triplet).await,
            SyncAction::DeleteLocal => self.delete_local(triplet).await,
            SyncAction::DeleteLocalFolder => self.delete_local_folder(triplet).await,
            SyncAction::DeleteRemote => self.delete_remote(triplet).await,
            SyncAction::DeleteRemoteFolder => self.delete_remote_folder(triplet).await,
            SyncAction::RestoreFromRemote => self.restore_from_remote(triplet).await,
            SyncAction::RemoveRecord => self.remove_record(triplet).await,
            SyncAction::MoveRemote => self.move_remote(triplet).await,
            SyncAction::MoveLocal => self.move_local(triplet).await,
            SyncAction::Conflict => self.resolve_conflict(triplet).await,
        }
    }

    async fn fail(&self, triplet: &SyncTriplet, error: SyncError) -> OperationResult {
        let path = triplet.relative_path().to_string();
        match &error {
            SyncError::Bridge(e) if e.is_permission_denied() => {
                warn!(path = %path, error = %e, "Permission denied; no longer tracking item");
                if let Err(e) = self.forget_record(triplet).await {
                    warn!(path = %path, error = %e, "Failed to drop record");
                }
            }
            SyncError::Bridge(e) if e.is_name_constraint() => {
                warn!(path = %path, error = %e, "Remote name constraint; will retry next pass");
            }
            e => warn!(path = %path, error = %e, "Operation failed"),
        }
        self.ctx.emit(ItemEvent::Failed {
            path,
            message: error.to_string(),
        });
        OperationResult::Failed
    }

    // ========================================================================
    // Towards the remote side
    // ========================================================================

    async fn upload_new(&self, triplet: &SyncTriplet) -> Result<OperationResult> {
        let relative = triplet.relative_path();
        let parent_id = self.parent_remote_id(relative).await?;
        let content = self.ctx.fs.read_file(&triplet.local().full_path()).await?;
        let checksum = content_checksum(&content);

        let document = self
            .ctx
            .repository
            .create_document(&parent_id, file_name(relative), content)
            .await?;

        let remote_modified = document.last_modified.map(|t| t.timestamp_millis());
        self.record_uploaded(triplet, relative, &document.id, checksum, remote_modified)
            .await?;

        info!(path = %relative, remote_id = %document.id, "Uploaded new file");
        self.ctx.emit(ItemEvent::Uploaded {
            path: relative.to_string(),
        });
        Ok(OperationResult::Succeed)
    }

    async fn create_remote_folder(&self, triplet: &SyncTriplet) -> Result<OperationResult> {
        let relative = triplet.relative_path();
        let parent_id = self.parent_remote_id(relative).await?;
        let folder = self
            .ctx
            .repository
            .create_folder(&parent_id, file_name(relative))
            .await?;

        let mut record = MappedFolder::new(relative, relative, &folder.id);
        record.remote_modified = folder.last_modified.map(|t| t.timestamp_millis());
        self.ctx.store.add_folder(&record).await?;

        info!(path = %relative, remote_id = %folder.id, "Created remote folder");
        self.ctx.emit(ItemEvent::Uploaded {
            path: relative.to_string(),
        });
        Ok(OperationResult::Succeed)
    }

    async fn update_remote(&self, triplet: &SyncTriplet) -> Result<OperationResult> {
        if self.checked_out_by_other(triplet.remote()) {
            return self.resolve_conflict(triplet).await;
        }

        let relative = triplet.relative_path();
        let remote_id = self.remote_id(triplet)?;
        let content = self.ctx.fs.read_file(&triplet.local().full_path()).await?;
        let checksum = content_checksum(&content);

        let document = match self
            .ctx
            .repository
            .set_content_stream(remote_id, content, true)
            .await
        {
            Ok(document) => document,
            Err(e) if e.is_checked_out() => {
                info!(path = %relative, "Document checked out remotely; keeping remote version");
                return self.resolve_conflict(triplet).await;
            }
            Err(e) => return Err(e.into()),
        };

        let remote_modified = document.last_modified.map(|t| t.timestamp_millis());
        let remote_path = triplet.db().remote_path().unwrap_or(relative).to_string();
        self.record_uploaded(triplet, &remote_path, &document.id, checksum, remote_modified)
            .await?;

        info!(path = %relative, "Updated remote content");
        self.ctx.emit(ItemEvent::Uploaded {
            path: relative.to_string(),
        });
        Ok(OperationResult::Succeed)
    }

    /// Deleted remotely after a local change: upload again.
    async fn restore_remote(&self, triplet: &SyncTriplet) -> Result<OperationResult> {
        self.forget_record(triplet).await?;
        if triplet.is_folder() {
            self.create_remote_folder(triplet).await
        } else {
            self.upload_new(triplet).await
        }
    }

    async fn delete_remote(&self, triplet: &SyncTriplet) -> Result<OperationResult> {
        if self.checked_out_by_other(triplet.remote()) {
            return self.restore_from_remote(triplet).await;
        }

        let relative = triplet.relative_path();
        let remote_id = self.remote_id(triplet)?;
        match self.ctx.repository.delete_all_versions(remote_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!(path = %relative, "Already gone remotely"),
            Err(e) if e.is_checked_out() => {
                info!(path = %relative, "Document checked out remotely; restoring local copy");
                return self.restore_from_remote(triplet).await;
            }
            Err(e) => return Err(e.into()),
        }

        self.forget_record(triplet).await?;
        info!(path = %relative, "Deleted remote document");
        self.ctx.emit(ItemEvent::RemoteDeleted {
            path: relative.to_string(),
        });
        Ok(OperationResult::Succeed)
    }

    /// Only deletes an empty remote folder: children still present remotely
    /// failed to delete, or were added since.
    async fn delete_remote_folder(&self, triplet: &SyncTriplet) -> Result<OperationResult> {
        let relative = triplet.relative_path();
        let remote_id = self.remote_id(triplet)?;
        let probe = OperationContext {
            max_items_per_page: 1,
            include_path_segments: false,
        };

        match self.ctx.repository.get_children(remote_id, &probe).await {
            Ok(children) if !children.is_empty() => {
                warn!(path = %relative, "Remote folder is not empty; not deleting");
                self.ctx.emit(ItemEvent::Failed {
                    path: relative.to_string(),
                    message: "remote folder is not empty".to_string(),
                });
                return Ok(OperationResult::Failed);
            }
            Ok(_) => match self.ctx.repository.delete_tree(remote_id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            },
            Err(e) if e.is_not_found() => debug!(path = %relative, "Already gone remotely"),
            Err(e) => return Err(e.into()),
        }

        self.forget_record(triplet).await?;
        info!(path = %relative, "Deleted remote folder");
        self.ctx.emit(ItemEvent::RemoteDeleted {
            path: relative.to_string(),
        });
        Ok(OperationResult::Succeed)
    }

    /// Renamed or moved locally: apply the same to the remote object.
    async fn move_remote(&self, triplet: &SyncTriplet) -> Result<OperationResult> {
        let Some(record) = triplet.db().record() else {
            return Err(SyncError::Logic(format!("{triplet} moved without a record")));
        };
        let Some(object) = triplet.remote().object() else {
            return Err(SyncError::Logic(format!("{triplet} moved without a remote object")));
        };

        let old_local = record.local_path().to_string();
        let old_remote = record.remote_path();
        let new_relative = triplet.relative_path();
        let remote_id = object.id().to_string();
        let mut moved: RemoteObject = object.clone();

        if parent_of(old_remote) != parent_of(new_relative) {
            let source = match object.parent_id() {
                Some(id) => id.to_string(),
                None => self.parent_remote_id(old_remote).await?,
            };
            let target = self.parent_remote_id(new_relative).await?;
            moved = self
                .ctx
                .repository
                .move_object(&remote_id, &source, &target)
                .await?;
        }
        if file_name(old_remote) != file_name(new_relative) {
            moved = self
                .ctx
                .repository
                .update_properties(&remote_id, &ObjectProperties::rename(file_name(new_relative)))
                .await?;
        }
        let remote_modified = moved.last_modified().map(|t| t.timestamp_millis());

        match record {
            MappedObject::Folder(_) => {
                let mut folder = MappedFolder::new(new_relative, new_relative, &remote_id);
                folder.remote_modified = remote_modified;
                self.ctx.store.move_folder(&old_local, &folder).await?;
            }
            MappedObject::File(file) => {
                let local = triplet.local();
                let mut updated = MappedFile::new(new_relative, new_relative, &remote_id)
                    .with_local_state(local.modified_at(), local.size().unwrap_or_default())
                    .with_remote_modified(remote_modified);
                updated.checksum = file.checksum.clone();

                if !triplet.local_eq_db() {
                    let content = self.ctx.fs.read_file(&local.full_path()).await?;
                    updated.checksum = Some(content_checksum(&content));
                    let document = self
                        .ctx
                        .repository
                        .set_content_stream(&remote_id, content, true)
                        .await?;
                    updated.remote_modified = document.last_modified.map(|t| t.timestamp_millis());
                }
                self.ctx.store.move_file(&old_local, &updated).await?;
            }
        }

        info!(from = %old_local, to = %new_relative, "Moved remote object");
        self.ctx.emit(ItemEvent::Moved {
            from: old_local,
            to: new_relative.to_string(),
            remote: true,
        });
        Ok(OperationResult::Succeed)
    }

    // ========================================================================
    // Towards the local side
    // ========================================================================

    async fn download(&self, triplet: &SyncTriplet, restored: bool) -> Result<OperationResult> {
        let relative = triplet.relative_path();
        let store = &self.ctx.store;
        let attempts = store
            .operation_retry_count(relative, ObjectKind::File, OperationKind::Download)
            .await?;
        if attempts >= self.ctx.settings.max_download_retries {
            warn!(path = %relative, attempts, "Download failed too often; skipping");
            return Ok(OperationResult::Skipped);
        }

        if let Err(e) = self.fetch_document(relative, triplet.remote()).await {
            let attempts = store
                .increment_operation_retry(relative, ObjectKind::File, OperationKind::Download)
                .await?;
            debug!(path = %relative, attempts, "Recorded failed download");
            return Err(e);
        }
        store
            .reset_operation_retry(relative, ObjectKind::File, OperationKind::Download)
            .await?;

        info!(path = %relative, restored, "Downloaded file");
        self.ctx.emit(ItemEvent::Downloaded {
            path: relative.to_string(),
            restored,
        });
        Ok(OperationResult::Succeed)
    }

    async fn create_local_folder(&self, triplet: &SyncTriplet, restored: bool) -> Result<OperationResult> {
        let relative = triplet.relative_path();
        self.ctx.fs.create_dir_all(&triplet.local().full_path()).await?;
        self.record_folder(relative, triplet.remote()).await?;

        info!(path = %relative, "Created local folder");
        self.ctx.emit(ItemEvent::Downloaded {
            path: relative.to_string(),
            restored,
        });
        Ok(OperationResult::Succeed)
    }

    /// Deleted locally after a remote change, or a remote delete refused
    /// because another user holds the document: bring the remote copy back.
    async fn restore_from_remote(&self, triplet: &SyncTriplet) -> Result<OperationResult> {
        if triplet.is_folder() {
            self.create_local_folder(triplet, true).await
        } else {
            self.download(triplet, true).await
        }
    }

    async fn delete_local(&self, triplet: &SyncTriplet) -> Result<OperationResult> {
        let relative = triplet.relative_path();
        match self.ctx.fs.delete_file(&triplet.local().full_path()).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        self.forget_record(triplet).await?;

        info!(path = %relative, "Deleted local file");
        self.ctx.emit(ItemEvent::LocalDeleted {
            path: relative.to_string(),
        });
        Ok(OperationResult::Succeed)
    }

    /// Only removes an empty directory. Anything left inside is kept: the
    /// record is dropped either way, and a directory still holding synced
    /// content is set aside under a conflict name.
    async fn delete_local_folder(&self, triplet: &SyncTriplet) -> Result<OperationResult> {
        let relative = triplet.relative_path();
        let full = triplet.local().full_path();
        let entries = self.ctx.fs.list_directory(&full).await?;

        if entries.is_empty() {
            self.ctx.fs.remove_dir(&full).await?;
            self.forget_record(triplet).await?;
            info!(path = %relative, "Deleted local folder");
            self.ctx.emit(ItemEvent::LocalDeleted {
                path: relative.to_string(),
            });
            return Ok(OperationResult::Succeed);
        }

        self.forget_record(triplet).await?;
        let holds_synced_content = entries.iter().any(|entry| {
            entry
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| self.ctx.filter.is_worth_syncing_name(name))
        });

        let renamed_to = if holds_synced_content {
            let target = self.conflict_name(relative, true);
            self.ctx
                .fs
                .rename(&full, &self.ctx.local_full_path(&target))
                .await?;
            Some(target)
        } else {
            None
        };

        warn!(
            path = %relative,
            renamed_to = ?renamed_to,
            "Folder deleted remotely is not empty locally; keeping it"
        );
        self.ctx.emit(ItemEvent::Conflict {
            path: relative.to_string(),
            renamed_to,
        });
        Ok(OperationResult::Conflict)
    }

    /// Moved remotely: move the local entry along with it.
    async fn move_local(&self, triplet: &SyncTriplet) -> Result<OperationResult> {
        let Some(record) = triplet.db().record() else {
            return Err(SyncError::Logic(format!("{triplet} moved without a record")));
        };
        let remote = triplet.remote();
        let old_local = record.local_path().to_string();
        let new_relative = remote.relative_path().to_string();
        let old_full = self.ctx.local_full_path(&old_local);
        let new_full = self.ctx.local_full_path(&new_relative);

        if self.ctx.fs.exists(&new_full).await? {
            return Err(BridgeError::NameConstraint(format!(
                "cannot move {old_local} to {new_relative}: target exists locally"
            ))
            .into());
        }

        if !self.ctx.fs.exists(&old_full).await? {
            // Nothing to move; fetch it at its new place.
            self.forget_record(triplet).await?;
            if remote.is_folder() {
                self.ctx.fs.create_dir_all(&new_full).await?;
                self.record_folder(&new_relative, remote).await?;
            } else {
                self.fetch_document(&new_relative, remote).await?;
            }
        } else {
            if let Some(parent) = new_full.parent() {
                self.ctx.fs.create_dir_all(parent).await?;
            }
            self.ctx.fs.rename(&old_full, &new_full).await?;

            let remote_id = remote.id().unwrap_or(record.remote_id()).to_string();
            match record {
                MappedObject::Folder(folder) => {
                    let mut moved = MappedFolder::new(&new_relative, &new_relative, &remote_id);
                    moved.remote_modified = folder.remote_modified;
                    self.ctx.store.move_folder(&old_local, &moved).await?;
                }
                MappedObject::File(file) => {
                    // Content is left as recorded; a remote edit shows up as
                    // a plain download on the next pass.
                    let mut moved = file.clone();
                    moved.local_path = new_relative.clone();
                    moved.remote_path = new_relative.clone();
                    moved.remote_id = remote_id;
                    self.ctx.store.move_file(&old_local, &moved).await?;
                }
            }
        }

        info!(from = %old_local, to = %new_relative, "Moved local entry");
        self.ctx.emit(ItemEvent::Moved {
            from: old_local,
            to: new_relative,
            remote: false,
        });
        Ok(OperationResult::Succeed)
    }

    // ========================================================================
    // Bookkeeping only
    // ========================================================================

    /// Both sides hold the item without a record (or agree after
    /// independent moves). Files must have the same content.
    async fn record_existing(&self, triplet: &SyncTriplet) -> Result<OperationResult> {
        let relative = triplet.relative_path();
        let remote = triplet.remote();
        let old_local = triplet.db().local_path().filter(|old| *old != relative);

        if triplet.is_folder() {
            let mut folder =
                MappedFolder::new(relative, remote.relative_path(), self.remote_id(triplet)?);
            folder.remote_modified = remote.last_modified_millis();
            match old_local {
                Some(old) => self.ctx.store.move_folder(old, &folder).await?,
                None => self.ctx.store.add_folder(&folder).await?,
            }
            debug!(path = %relative, "Recorded existing folder");
            return Ok(OperationResult::Succeed);
        }

        let local = triplet.local();
        let remote_length = match remote.object() {
            Some(RemoteObject::Document(document)) => document.content_length,
            _ => None,
        };
        if remote_length.is_some_and(|length| Some(length) != local.size()) {
            return self.resolve_conflict(triplet).await;
        }

        let remote_id = self.remote_id(triplet)?;
        let local_content = self.ctx.fs.read_file(&local.full_path()).await?;
        let remote_content = self.ctx.repository.get_content_stream(remote_id).await?;
        let checksum = content_checksum(&local_content);
        if checksum != content_checksum(&remote_content) {
            return self.resolve_conflict(triplet).await;
        }

        let file = MappedFile::new(relative, remote.relative_path(), remote_id)
            .with_checksum(checksum)
            .with_local_state(local.modified_at(), local.size().unwrap_or_default())
            .with_remote_modified(remote.last_modified_millis());
        match old_local {
            Some(old) => self.ctx.store.move_file(old, &file).await?,
            None => self.ctx.store.add_file(&file).await?,
        }
        debug!(path = %relative, "Recorded identical file present on both sides");
        Ok(OperationResult::Succeed)
    }

    async fn remove_record(&self, triplet: &SyncTriplet) -> Result<OperationResult> {
        self.forget_record(triplet).await?;
        debug!(path = %triplet.relative_path(), "Gone on both sides; record removed");
        Ok(OperationResult::Succeed)
    }

    /// Keep the local copy under a conflict name and take the remote
    /// version as the truth.
    async fn resolve_conflict(&self, triplet: &SyncTriplet) -> Result<OperationResult> {
        let relative = triplet.relative_path();

        let renamed_to = if triplet.local_exist() {
            let target = self.conflict_name(relative, triplet.local().is_directory());
            self.ctx
                .fs
                .rename(&triplet.local().full_path(), &self.ctx.local_full_path(&target))
                .await?;
            Some(target)
        } else {
            None
        };
        self.forget_record(triplet).await?;

        let remote = triplet.remote();
        if remote.exists() {
            let remote_relative = remote.relative_path();
            if remote.is_folder() {
                self.ctx
                    .fs
                    .create_dir_all(&self.ctx.local_full_path(remote_relative))
                    .await?;
                self.record_folder(remote_relative, remote).await?;
            } else {
                self.fetch_document(remote_relative, remote).await?;
            }
        }

        warn!(path = %relative, renamed_to = ?renamed_to, "Conflict resolved in favour of remote");
        self.ctx.emit(ItemEvent::Conflict {
            path: relative.to_string(),
            renamed_to,
        });
        Ok(OperationResult::Conflict)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Remote id of the folder that holds `relative`.
    async fn parent_remote_id(&self, relative: &str) -> Result<String> {
        let Some(parent) = parent_of(relative) else {
            return Ok(self.ctx.remote_root_id.clone());
        };
        match self.ctx.store.find_by_local_path(parent).await? {
            Some(MappedObject::Folder(folder)) => Ok(folder.remote_id),
            _ => Err(BridgeError::NotFound(format!("parent folder {parent} is not synchronized")).into()),
        }
    }

    fn remote_id<'a>(&self, triplet: &'a SyncTriplet) -> Result<&'a str> {
        triplet
            .remote()
            .id()
            .or_else(|| triplet.db().remote_id())
            .ok_or_else(|| SyncError::Logic(format!("{triplet} has no remote id")))
    }

    fn checked_out_by_other(&self, remote: &RemoteStorageItem) -> bool {
        remote
            .checked_out_by()
            .is_some_and(|owner| owner != self.ctx.user_name)
    }

    /// Drop the record of the triplet, keyed by its recorded local path.
    async fn forget_record(&self, triplet: &SyncTriplet) -> Result<()> {
        match triplet.db().record() {
            Some(MappedObject::File(file)) => {
                self.ctx.store.remove_file(&file.local_path).await?;
            }
            Some(MappedObject::Folder(folder)) => {
                self.ctx.store.remove_folder(&folder.local_path).await?;
            }
            None => {}
        }
        Ok(())
    }

    async fn record_uploaded(
        &self,
        triplet: &SyncTriplet,
        remote_path: &str,
        remote_id: &str,
        checksum: String,
        remote_modified: Option<i64>,
    ) -> Result<()> {
        let local = triplet.local();
        let file = MappedFile::new(triplet.relative_path(), remote_path, remote_id)
            .with_checksum(checksum)
            .with_local_state(local.modified_at(), local.size().unwrap_or_default())
            .with_remote_modified(remote_modified);
        self.ctx.store.add_file(&file).await?;
        Ok(())
    }

    async fn record_folder(&self, local_relative: &str, remote: &RemoteStorageItem) -> Result<()> {
        let remote_id = remote
            .id()
            .ok_or_else(|| SyncError::Logic(format!("folder {local_relative} has no remote id")))?;
        let mut folder = MappedFolder::new(local_relative, remote.relative_path(), remote_id);
        folder.remote_modified = remote.last_modified_millis();
        self.ctx.store.add_folder(&folder).await?;
        Ok(())
    }

    /// Download a document to `local_relative` and record it.
    async fn fetch_document(&self, local_relative: &str, remote: &RemoteStorageItem) -> Result<()> {
        let remote_id = remote
            .id()
            .ok_or_else(|| SyncError::Logic(format!("download of {local_relative} without a remote id")))?;
        let content = self.ctx.repository.get_content_stream(remote_id).await?;
        let checksum = content_checksum(&content);

        let full = self.ctx.local_full_path(local_relative);
        if let Some(parent) = full.parent() {
            self.ctx.fs.create_dir_all(parent).await?;
        }
        self.ctx.fs.write_file(&full, content).await?;
        let remote_modified = remote.last_modified_millis();
        if let Some(modified) = remote_modified {
            self.ctx.fs.set_modified(&full, modified).await?;
        }

        let metadata = self.ctx.fs.metadata(&full).await?;
        let file = MappedFile::new(local_relative, remote.relative_path(), remote_id)
            .with_checksum(checksum)
            .with_local_state(metadata.modified_at, metadata.size)
            .with_remote_modified(remote_modified);
        self.ctx.store.add_file(&file).await?;
        Ok(())
    }

    /// `dir/report_alice_20240101120000.txt` for `dir/report.txt`.
    fn conflict_name(&self, relative: &str, is_folder: bool) -> String {
        let stamp = self.ctx.clock.now().format("%Y%m%d%H%M%S");
        let name = file_name(relative);
        let (stem, extension) = match name.rsplit_once('.') {
            Some((stem, ext)) if !is_folder && !stem.is_empty() => (stem, format!(".{ext}")),
            _ => (name, String::new()),
        };
        let renamed = format!("{stem}_{}_{stamp}{extension}", self.ctx.user_name);
        match parent_of(relative) {
            Some(parent) => format!("{parent}/{renamed}"),
            None => renamed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support;
    use crate::items::{DbStorageItem, LocalStorageItem};
    use crate::triplet::{TripletFactory, TripletOrigin};
    use async_trait::async_trait;
    use bridge_traits::{ContentChanges, RemoteDocument, RemoteFolder};
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use core_runtime::config::SyncSettings;
    use mockall::mock;
    use std::path::Path;
    use tempfile::TempDir;

    mock! {
        Repository {}

        #[async_trait]
        impl bridge_traits::RemoteRepository for Repository {
            async fn get_object(&self, id: &str) -> bridge_traits::error::Result<RemoteObject>;
            async fn get_object_by_path(&self, path: &str) -> bridge_traits::error::Result<RemoteObject>;
            async fn get_children(
                &self,
                folder_id: &str,
                context: &OperationContext,
            ) -> bridge_traits::error::Result<Vec<RemoteObject>>;
            async fn get_content_stream(&self, document_id: &str) -> bridge_traits::error::Result<Bytes>;
            async fn set_content_stream(
                &self,
                document_id: &str,
                content: Bytes,
                overwrite: bool,
            ) -> bridge_traits::error::Result<RemoteDocument>;
            async fn create_folder(&self, parent_id: &str, name: &str) -> bridge_traits::error::Result<RemoteFolder>;
            async fn create_document(
                &self,
                parent_id: &str,
                name: &str,
                content: Bytes,
            ) -> bridge_traits::error::Result<RemoteDocument>;
            async fn move_object(
                &self,
                object_id: &str,
                source_folder_id: &str,
                target_folder_id: &str,
            ) -> bridge_traits::error::Result<RemoteObject>;
            async fn update_properties(
                &self,
                object_id: &str,
                properties: &ObjectProperties,
            ) -> bridge_traits::error::Result<RemoteObject>;
            async fn delete_tree(&self, folder_id: &str) -> bridge_traits::error::Result<()>;
            async fn delete_all_versions(&self, document_id: &str) -> bridge_traits::error::Result<()>;
            async fn latest_change_log_token(&self) -> bridge_traits::error::Result<Option<String>>;
            async fn get_content_changes(
                &self,
                token: &str,
                include_properties: bool,
                max_items: u32,
            ) -> bridge_traits::error::Result<ContentChanges>;
        }
    }

    fn document(id: &str, relative: &str, checked_out_by: Option<&str>) -> RemoteDocument {
        RemoteDocument {
            id: id.to_string(),
            name: file_name(relative).to_string(),
            path: format!("/sites/docs/{relative}"),
            parent_id: Some("root".to_string()),
            last_modified: Utc.timestamp_millis_opt(42_000).single(),
            content_length: Some(5),
            checked_out_by: checked_out_by.map(str::to_string),
        }
    }

    async fn setup(repository: MockRepository) -> (TempDir, Arc<SyncContext>) {
        let dir = TempDir::new().unwrap();
        let ctx = test_support::context(dir.path(), Arc::new(repository), SyncSettings::default()).await;
        (dir, Arc::new(ctx))
    }

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[core_async::test]
    async fn test_upload_new_records_checksum() {
        let mut repository = MockRepository::new();
        repository
            .expect_create_document()
            .withf(|parent, name, content| parent == "root" && name == "b.txt" && content.as_ref() == b"hello")
            .times(1)
            .returning(|_, _, _| Ok(document("doc-1", "b.txt", None)));

        let (dir, ctx) = setup(repository).await;
        write(dir.path(), "b.txt", "hello");

        let factory = TripletFactory::new(Arc::clone(&ctx));
        let mut triplet = factory.from_local("b.txt", TripletOrigin::LocalCrawl).await.unwrap();
        triplet
            .assemble_remote_into_local(RemoteStorageItem::absent("/sites/docs", "b.txt"))
            .unwrap();

        let result = WorkerOperations::new(Arc::clone(&ctx))
            .execute(&triplet, SyncAction::UploadNew)
            .await;
        assert_eq!(result, OperationResult::Succeed);

        let record = ctx.store.find_by_local_path("b.txt").await.unwrap().unwrap();
        assert_eq!(record.remote_id(), "doc-1");
        assert_eq!(
            record.as_file().unwrap().checksum.as_deref(),
            Some(content_checksum(b"hello").as_str())
        );
    }

    #[core_async::test]
    async fn test_upload_into_unsynchronized_parent_fails() {
        let (dir, ctx) = setup(MockRepository::new()).await;
        write(dir.path(), "a/b.txt", "hello");

        let factory = TripletFactory::new(Arc::clone(&ctx));
        let mut triplet = factory.from_local("a/b.txt", TripletOrigin::LocalCrawl).await.unwrap();
        triplet
            .assemble_remote_into_local(RemoteStorageItem::absent("/sites/docs", "a/b.txt"))
            .unwrap();

        let result = WorkerOperations::new(Arc::clone(&ctx))
            .execute(&triplet, SyncAction::UploadNew)
            .await;
        assert_eq!(result, OperationResult::Failed);
        assert!(ctx.store.find_by_local_path("a/b.txt").await.unwrap().is_none());
    }

    #[core_async::test]
    async fn test_delete_of_checked_out_document_restores_it() {
        let mut repository = MockRepository::new();
        repository
            .expect_delete_all_versions()
            .withf(|id| id == "doc-1")
            .times(1)
            .returning(|_| Err(BridgeError::CheckedOut("bob".into())));
        repository
            .expect_get_content_stream()
            .times(1)
            .returning(|_| Ok(Bytes::from_static(b"hello")));

        let (dir, ctx) = setup(repository).await;
        let record = MappedFile::new("b.txt", "b.txt", "doc-1").with_remote_modified(Some(42_000));
        ctx.store.add_file(&record).await.unwrap();

        let triplet = SyncTriplet::new(
            LocalStorageItem::absent(dir.path().to_path_buf(), "b.txt"),
            RemoteStorageItem::present(
                "/sites/docs",
                "b.txt",
                RemoteObject::Document(document("doc-1", "b.txt", None)),
            ),
            DbStorageItem::new(Some(MappedObject::File(record))),
            false,
            TripletOrigin::LocalCrawl,
        );

        let result = WorkerOperations::new(Arc::clone(&ctx))
            .execute(&triplet, SyncAction::DeleteRemote)
            .await;
        assert_eq!(result, OperationResult::Succeed);
        assert_eq!(std::fs::read(dir.path().join("b.txt")).unwrap(), b"hello");
    }

    #[core_async::test]
    async fn test_download_skipped_after_retry_ceiling() {
        let (dir, ctx) = setup(MockRepository::new()).await;
        for _ in 0..ctx.settings.max_download_retries {
            ctx.store
                .increment_operation_retry("b.txt", ObjectKind::File, OperationKind::Download)
                .await
                .unwrap();
        }

        let triplet = SyncTriplet::new(
            LocalStorageItem::absent(dir.path().to_path_buf(), "b.txt"),
            RemoteStorageItem::present(
                "/sites/docs",
                "b.txt",
                RemoteObject::Document(document("doc-1", "b.txt", None)),
            ),
            DbStorageItem::none(),
            false,
            TripletOrigin::RemoteCrawl,
        );

        let result = WorkerOperations::new(Arc::clone(&ctx))
            .execute(&triplet, SyncAction::Download)
            .await;
        assert_eq!(result, OperationResult::Skipped);
    }

    #[core_async::test]
    async fn test_failed_download_bumps_retry_counter() {
        let mut repository = MockRepository::new();
        repository
            .expect_get_content_stream()
            .returning(|_| Err(BridgeError::Connection("reset".into())));

        let (dir, ctx) = setup(repository).await;
        let triplet = SyncTriplet::new(
            LocalStorageItem::absent(dir.path().to_path_buf(), "b.txt"),
            RemoteStorageItem::present(
                "/sites/docs",
                "b.txt",
                RemoteObject::Document(document("doc-1", "b.txt", None)),
            ),
            DbStorageItem::none(),
            false,
            TripletOrigin::RemoteCrawl,
        );

        let operations = WorkerOperations::new(Arc::clone(&ctx));
        assert_eq!(operations.execute(&triplet, SyncAction::Download).await, OperationResult::Failed);
        let attempts = ctx
            .store
            .operation_retry_count("b.txt", ObjectKind::File, OperationKind::Download)
            .await
            .unwrap();
        assert_eq!(attempts, 1);
    }

    #[core_async::test]
    async fn test_permission_denied_drops_record() {
        let mut repository = MockRepository::new();
        repository
            .expect_set_content_stream()
            .returning(|_, _, _| Err(BridgeError::PermissionDenied("read only".into())));

        let (dir, ctx) = setup(repository).await;
        write(dir.path(), "b.txt", "changed");
        let record = MappedFile::new("b.txt", "b.txt", "doc-1").with_remote_modified(Some(42_000));
        ctx.store.add_file(&record).await.unwrap();

        let factory = TripletFactory::new(Arc::clone(&ctx));
        let mut triplet = factory.from_local("b.txt", TripletOrigin::Watcher).await.unwrap();
        triplet
            .assemble_remote_into_local(RemoteStorageItem::present(
                "/sites/docs",
                "b.txt",
                RemoteObject::Document(document("doc-1", "b.txt", None)),
            ))
            .unwrap();

        let result = WorkerOperations::new(Arc::clone(&ctx))
            .execute(&triplet, SyncAction::UpdateRemote)
            .await;
        assert_eq!(result, OperationResult::Failed);
        assert!(ctx.store.find_by_local_path("b.txt").await.unwrap().is_none());
    }

    #[core_async::test]
    async fn test_conflict_keeps_local_copy_and_fetches_remote() {
        let mut repository = MockRepository::new();
        repository
            .expect_get_content_stream()
            .returning(|_| Ok(Bytes::from_static(b"theirs")));

        let (dir, ctx) = setup(repository).await;
        write(dir.path(), "notes.txt", "mine");

        let triplet = SyncTriplet::new(
            LocalStorageItem::load(&ctx, "notes.txt").await.unwrap(),
            RemoteStorageItem::present(
                "/sites/docs",
                "notes.txt",
                RemoteObject::Document(document("doc-1", "notes.txt", None)),
            ),
            DbStorageItem::none(),
            false,
            TripletOrigin::LocalCrawl,
        );

        let result = WorkerOperations::new(Arc::clone(&ctx))
            .execute(&triplet, SyncAction::Conflict)
            .await;
        assert_eq!(result, OperationResult::Conflict);

        // FixedClock: 2023-11-14 22:13:20 UTC.
        let kept = dir.path().join("notes_alice_20231114221320.txt");
        assert_eq!(std::fs::read(kept).unwrap(), b"mine");
        assert_eq!(std::fs::read(dir.path().join("notes.txt")).unwrap(), b"theirs");
    }

    #[core_async::test]
    async fn test_conflict_name_keeps_extension() {
        let (_dir, ctx) = setup(MockRepository::new()).await;
        let operations = WorkerOperations::new(ctx);
        assert_eq!(
            operations.conflict_name("a/report.final.docx", false),
            "a/report.final_alice_20231114221320.docx"
        );
        assert_eq!(operations.conflict_name("a.dir", true), "a.dir_alice_20231114221320");
        assert_eq!(operations.conflict_name(".hidden", false), ".hidden_alice_20231114221320");
    }

    #[core_async::test]
    async fn test_remote_folder_with_children_is_not_deleted() {
        let mut repository = MockRepository::new();
        repository
            .expect_get_children()
            .returning(|_, _| Ok(vec![RemoteObject::Document(document("doc-2", "a/x.txt", None))]));
        repository.expect_delete_tree().never();

        let (dir, ctx) = setup(repository).await;
        let record = MappedFolder::new("a", "a", "folder-1");
        ctx.store.add_folder(&record).await.unwrap();

        let triplet = SyncTriplet::new(
            LocalStorageItem::absent(dir.path().to_path_buf(), "a"),
            RemoteStorageItem::present(
                "/sites/docs",
                "a",
                RemoteObject::Folder(RemoteFolder {
                    id: "folder-1".into(),
                    name: "a".into(),
                    path: "/sites/docs/a".into(),
                    parent_id: Some("root".into()),
                    last_modified: None,
                }),
            ),
            DbStorageItem::new(Some(MappedObject::Folder(record))),
            false,
            TripletOrigin::LocalCrawl,
        );

        let result = WorkerOperations::new(Arc::clone(&ctx))
            .execute(&triplet, SyncAction::DeleteRemoteFolder)
            .await;
        assert_eq!(result, OperationResult::Failed);
        assert!(ctx.store.find_by_local_path("a").await.unwrap().is_some());
    }
}
