//! # Sync Triplet
//!
//! The unit of reconciliation: the (Local, Database, Remote) state of one
//! logical path.
//!
//! ## Lifecycle
//!
//! A triplet is created by a crawler (or the assembler) as soon as a path is
//! discovered, consumed exactly once by the processor and then dropped.
//! Nothing is cached across passes. The only mutation after construction is
//! [`SyncTriplet::assemble_remote_into_local`], the one-time transition of a
//! local-origin triplet from "remote unknown" to "remote known".
//!
//! ## Names
//!
//! The dependency tracker and the remote buffer key triplets by name: the
//! local relative path, with a trailing `/` for folders so that a folder and
//! a same-named file never collide.

use crate::context::{parent_of, SyncContext};
use crate::error::{Result, SyncError};
use crate::items::{DbStorageItem, LocalStorageItem, RemoteState, RemoteStorageItem};
use bridge_traits::RemoteObject;
use core_store::MappedObject;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Name of a triplet for the given relative path.
pub fn triplet_name(relative_path: &str, is_folder: bool) -> String {
    if is_folder {
        format!("{relative_path}/")
    } else {
        relative_path.to_string()
    }
}

/// Name of the folder triplet a path depends on, `None` at top level.
pub fn parent_name(relative_path: &str) -> Option<String> {
    parent_of(relative_path).map(|parent| triplet_name(parent, true))
}

/// Lower-case hex SHA-256 of some content.
pub fn content_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Which producer discovered the triplet. Only used for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripletOrigin {
    LocalCrawl,
    RemoteCrawl,
    Watcher,
    ChangeLog,
}

#[derive(Debug, Clone)]
pub struct SyncTriplet {
    name: String,
    is_folder: bool,
    local: LocalStorageItem,
    remote: RemoteStorageItem,
    db: DbStorageItem,
    local_eq_db: bool,
    origin: TripletOrigin,
}

impl SyncTriplet {
    pub fn new(
        local: LocalStorageItem,
        remote: RemoteStorageItem,
        db: DbStorageItem,
        local_eq_db: bool,
        origin: TripletOrigin,
    ) -> Self {
        let is_folder = if local.exists() {
            local.is_directory()
        } else if remote.exists() {
            remote.is_folder()
        } else {
            db.is_folder()
        };

        Self {
            name: triplet_name(local.relative_path(), is_folder),
            is_folder,
            local,
            remote,
            db,
            local_eq_db,
            origin,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Local relative path; the path this triplet reconciles.
    pub fn relative_path(&self) -> &str {
        self.local.relative_path()
    }

    pub fn parent_name(&self) -> Option<String> {
        parent_name(self.relative_path())
    }

    pub fn is_folder(&self) -> bool {
        self.is_folder
    }

    pub fn origin(&self) -> TripletOrigin {
        self.origin
    }

    pub fn local(&self) -> &LocalStorageItem {
        &self.local
    }

    pub fn remote(&self) -> &RemoteStorageItem {
        &self.remote
    }

    pub fn db(&self) -> &DbStorageItem {
        &self.db
    }

    pub fn local_exist(&self) -> bool {
        self.local.exists()
    }

    pub fn remote_exist(&self) -> bool {
        self.remote.exists()
    }

    pub fn db_exist(&self) -> bool {
        self.db.exists()
    }

    pub fn local_eq_db(&self) -> bool {
        self.local_eq_db
    }

    /// The remote object still matches what the store recorded.
    pub fn remote_eq_db(&self) -> bool {
        let (Some(object), Some(record)) = (self.remote.object(), self.db.record()) else {
            return false;
        };
        if self.remote.relative_path() != record.remote_path() {
            return false;
        }
        match (object, record) {
            (RemoteObject::Folder(_), MappedObject::Folder(_)) => true,
            (RemoteObject::Document(_), MappedObject::File(file)) => {
                self.remote.last_modified_millis() == file.remote_modified
            }
            _ => false,
        }
    }

    /// Local and remote disagree on whether this is a folder.
    pub fn kind_mismatch(&self) -> bool {
        let local_kind = self.local.exists().then(|| self.local.is_directory());
        let remote_kind = self.remote.exists().then(|| self.remote.is_folder());
        let db_kind = self.db.exists().then(|| self.db.is_folder());
        let kinds: Vec<bool> = [local_kind, remote_kind, db_kind]
            .into_iter()
            .flatten()
            .collect();
        kinds.windows(2).any(|pair| pair[0] != pair[1])
    }

    /// The local entry sits at a different path than the store recorded.
    pub fn is_local_moved(&self) -> bool {
        self.local.exists()
            && self
                .db
                .local_path()
                .is_some_and(|recorded| recorded != self.local.relative_path())
    }

    /// The remote object sits at a different path than the store recorded.
    pub fn is_remote_moved(&self) -> bool {
        self.remote.exists()
            && self
                .db
                .remote_path()
                .is_some_and(|recorded| recorded != self.remote.relative_path())
    }

    /// Attach remote state to a local-origin triplet.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Logic`] if the remote side is already known.
    pub fn assemble_remote_into_local(&mut self, remote: RemoteStorageItem) -> Result<()> {
        if self.remote.is_known() {
            return Err(SyncError::Logic(format!(
                "remote state of {} assembled twice",
                self.name
            )));
        }
        self.remote = remote;
        Ok(())
    }
}

impl fmt::Display for SyncTriplet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let remote = match self.remote.state() {
            RemoteState::Unknown => "?",
            RemoteState::Absent => "N",
            RemoteState::Present(_) => "Y",
        };
        write!(
            f,
            "{} [L:{} D:{} R:{} LeqD:{}]",
            self.name,
            if self.local_exist() { "Y" } else { "N" },
            if self.db_exist() { "Y" } else { "N" },
            remote,
            self.local_eq_db
        )
    }
}

// ============================================================================
// Factory
// ============================================================================

/// How a remote-origin triplet finds its store record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordLookup {
    /// By remote path; a full crawl matches paths.
    ByRemotePath,
    /// By remote id first; the change log reports ids, and a known id at a
    /// new path is a remote move.
    ByRemoteId,
}

/// Builds triplets from each kind of discovery.
#[derive(Clone)]
pub struct TripletFactory {
    ctx: Arc<SyncContext>,
}

impl TripletFactory {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    /// Current local state of `relative_path` joined with its store record.
    pub async fn from_local(&self, relative_path: &str, origin: TripletOrigin) -> Result<SyncTriplet> {
        let record = self.ctx.store.find_by_local_path(relative_path).await?;
        self.from_local_with_record(relative_path, record, origin).await
    }

    /// Current local state of `relative_path` joined with an explicitly
    /// chosen record, e.g. the record of a rename's old path.
    pub async fn from_local_with_record(
        &self,
        relative_path: &str,
        record: Option<MappedObject>,
        origin: TripletOrigin,
    ) -> Result<SyncTriplet> {
        let local = LocalStorageItem::load(&self.ctx, relative_path).await?;
        let db = DbStorageItem::new(record);
        let remote_relative = db.remote_path().unwrap_or(relative_path).to_string();
        let remote = RemoteStorageItem::unknown(self.ctx.remote_root.clone(), remote_relative);
        let local_eq_db = self.local_eq_db(&local, &db).await?;
        Ok(SyncTriplet::new(local, remote, db, local_eq_db, origin))
    }

    /// A store record whose local entry is expected at its recorded path.
    pub async fn from_record(
        &self,
        record: MappedObject,
        remote: Option<RemoteStorageItem>,
        origin: TripletOrigin,
    ) -> Result<SyncTriplet> {
        let local = LocalStorageItem::load(&self.ctx, record.local_path()).await?;
        let remote = remote.unwrap_or_else(|| {
            RemoteStorageItem::unknown(self.ctx.remote_root.clone(), record.remote_path())
        });
        let db = DbStorageItem::new(Some(record));
        let local_eq_db = self.local_eq_db(&local, &db).await?;
        Ok(SyncTriplet::new(local, remote, db, local_eq_db, origin))
    }

    /// A remote object with its store record and the local entry at the
    /// same relative path.
    pub async fn from_remote(
        &self,
        remote: RemoteStorageItem,
        lookup: RecordLookup,
        origin: TripletOrigin,
    ) -> Result<SyncTriplet> {
        let store = &self.ctx.store;
        let record = match (lookup, remote.id()) {
            (RecordLookup::ByRemoteId, Some(id)) => match store.find_by_remote_id(id).await? {
                Some(record) => Some(record),
                None => store.find_by_remote_path(remote.relative_path()).await?,
            },
            _ => store.find_by_remote_path(remote.relative_path()).await?,
        };

        let local = LocalStorageItem::load(&self.ctx, remote.relative_path()).await?;
        let db = DbStorageItem::new(record);
        let local_eq_db = self.local_eq_db(&local, &db).await?;
        Ok(SyncTriplet::new(local, remote, db, local_eq_db, origin))
    }

    /// Compare a local snapshot with the store record.
    ///
    /// Files match on size and modification time; when either differs the
    /// content checksum decides.
    pub async fn local_eq_db(&self, local: &LocalStorageItem, db: &DbStorageItem) -> Result<bool> {
        if !local.exists() {
            return Ok(false);
        }
        match db.record() {
            None => Ok(false),
            Some(MappedObject::Folder(_)) => Ok(local.is_directory()),
            Some(MappedObject::File(file)) => {
                if local.is_directory() {
                    return Ok(false);
                }
                if local.size() == file.size && local.modified_at() == file.local_modified {
                    return Ok(true);
                }
                let Some(recorded) = file.checksum.as_deref() else {
                    return Ok(false);
                };
                let content = match self.ctx.fs.read_file(&local.full_path()).await {
                    Ok(content) => content,
                    Err(e) if e.is_not_found() => return Ok(false),
                    Err(e) => return Err(e.into()),
                };
                let equal = content_checksum(&content) == recorded;
                debug!(
                    path = %local.relative_path(),
                    equal,
                    "Compared local checksum with recorded checksum"
                );
                Ok(equal)
            }
        }
    }
}
