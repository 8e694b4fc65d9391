//! Decision table from a triplet to the action that reconciles it.

use crate::dependencies::DependencyOrder;
use crate::items::RemoteState;
use crate::triplet::SyncTriplet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncAction {
    NoOp,
    UploadNew,
    CreateRemoteFolder,
    UpdateRemote,
    Download,
    CreateLocalFolder,
    /// Both sides hold the item and agree (or are folders); only the record
    /// is written.
    RecordExisting,
    /// Deleted remotely but changed locally: upload again.
    RestoreRemote,
    DeleteLocal,
    DeleteLocalFolder,
    DeleteRemote,
    DeleteRemoteFolder,
    /// Deleted locally but changed remotely: download again.
    RestoreFromRemote,
    /// Gone on both sides.
    RemoveRecord,
    MoveRemote,
    MoveLocal,
    Conflict,
    /// Remote state unknown; nothing can be decided this pass.
    Unresolved,
}

impl SyncAction {
    /// Ordering the action needs from the dependency tracker.
    pub fn dependency_order(self, is_folder: bool) -> DependencyOrder {
        match self {
            SyncAction::DeleteLocalFolder | SyncAction::DeleteRemoteFolder => {
                DependencyOrder::ChildrenFirst
            }
            SyncAction::RemoveRecord if is_folder => DependencyOrder::ChildrenFirst,
            SyncAction::NoOp
            | SyncAction::Unresolved
            | SyncAction::RemoveRecord
            | SyncAction::DeleteLocal
            | SyncAction::DeleteRemote => DependencyOrder::Unordered,
            _ => DependencyOrder::ParentFirst,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncAction::NoOp => "no-op",
            SyncAction::UploadNew => "upload",
            SyncAction::CreateRemoteFolder => "create-remote-folder",
            SyncAction::UpdateRemote => "update-remote",
            SyncAction::Download => "download",
            SyncAction::CreateLocalFolder => "create-local-folder",
            SyncAction::RecordExisting => "record-existing",
            SyncAction::RestoreRemote => "restore-remote",
            SyncAction::DeleteLocal => "delete-local",
            SyncAction::DeleteLocalFolder => "delete-local-folder",
            SyncAction::DeleteRemote => "delete-remote",
            SyncAction::DeleteRemoteFolder => "delete-remote-folder",
            SyncAction::RestoreFromRemote => "restore-from-remote",
            SyncAction::RemoveRecord => "remove-record",
            SyncAction::MoveRemote => "move-remote",
            SyncAction::MoveLocal => "move-local",
            SyncAction::Conflict => "conflict",
            SyncAction::Unresolved => "unresolved",
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the single action that reconciles `triplet`.
pub fn classify(triplet: &SyncTriplet) -> SyncAction {
    if matches!(triplet.remote().state(), RemoteState::Unknown) {
        return SyncAction::Unresolved;
    }
    if triplet.kind_mismatch() {
        return SyncAction::Conflict;
    }

    let folder = triplet.is_folder();
    let pick = |for_folder: SyncAction, for_file: SyncAction| {
        if folder {
            for_folder
        } else {
            for_file
        }
    };

    match (triplet.local_exist(), triplet.db_exist(), triplet.remote_exist()) {
        (false, false, false) => SyncAction::NoOp,
        (true, false, false) => pick(SyncAction::CreateRemoteFolder, SyncAction::UploadNew),
        (false, false, true) => pick(SyncAction::CreateLocalFolder, SyncAction::Download),
        (true, false, true) => SyncAction::RecordExisting,
        (false, true, false) => SyncAction::RemoveRecord,
        (true, true, false) => {
            if triplet.local_eq_db() {
                pick(SyncAction::DeleteLocalFolder, SyncAction::DeleteLocal)
            } else {
                SyncAction::RestoreRemote
            }
        }
        (false, true, true) => {
            if triplet.is_remote_moved() {
                SyncAction::MoveLocal
            } else if triplet.remote_eq_db() {
                pick(SyncAction::DeleteRemoteFolder, SyncAction::DeleteRemote)
            } else {
                SyncAction::RestoreFromRemote
            }
        }
        (true, true, true) => classify_present(triplet),
    }
}

/// All three sides exist.
fn classify_present(triplet: &SyncTriplet) -> SyncAction {
    let folder = triplet.is_folder();
    let local_moved = triplet.is_local_moved();
    let remote_moved = triplet.is_remote_moved();
    let same_place = triplet.remote().relative_path() == triplet.relative_path();

    if local_moved && remote_moved {
        // Moved independently: fine if both ended up in the same place.
        return if same_place {
            SyncAction::RecordExisting
        } else {
            SyncAction::Conflict
        };
    }
    if local_moved {
        return if same_place {
            SyncAction::RecordExisting
        } else {
            SyncAction::MoveRemote
        };
    }
    if remote_moved {
        return SyncAction::MoveLocal;
    }

    match (triplet.local_eq_db(), triplet.remote_eq_db()) {
        (true, true) => SyncAction::NoOp,
        _ if folder => SyncAction::RecordExisting,
        (true, false) => SyncAction::Download,
        (false, true) => SyncAction::UpdateRemote,
        (false, false) => SyncAction::Conflict,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::{DbStorageItem, LocalStorageItem, RemoteStorageItem};
    use crate::triplet::TripletOrigin;
    use bridge_traits::{FileMetadata, RemoteDocument, RemoteFolder, RemoteObject};
    use chrono::{TimeZone, Utc};
    use core_store::{MappedFile, MappedFolder, MappedObject};
    use std::path::PathBuf;

    const REMOTE_TIME: i64 = 5_000;

    fn local(rel: &str, exists: bool, dir: bool) -> LocalStorageItem {
        if !exists {
            return LocalStorageItem::absent(PathBuf::from("/sync"), rel);
        }
        LocalStorageItem::with_metadata(
            PathBuf::from("/sync"),
            rel,
            FileMetadata {
                size: 3,
                created_at: None,
                modified_at: Some(1_000),
                is_directory: dir,
            },
        )
    }

    fn remote(rel: &str, exists: bool, dir: bool, modified: i64) -> RemoteStorageItem {
        if !exists {
            return RemoteStorageItem::absent("/root", rel);
        }
        let name = rel.rsplit('/').next().unwrap_or(rel).to_string();
        let object = if dir {
            RemoteObject::Folder(RemoteFolder {
                id: "id-1".into(),
                name,
                path: format!("/root/{rel}"),
                parent_id: Some("root".into()),
                last_modified: Utc.timestamp_millis_opt(modified).single(),
            })
        } else {
            RemoteObject::Document(RemoteDocument {
                id: "id-1".into(),
                name,
                path: format!("/root/{rel}"),
                parent_id: Some("root".into()),
                last_modified: Utc.timestamp_millis_opt(modified).single(),
                content_length: Some(3),
                checked_out_by: None,
            })
        };
        RemoteStorageItem::present("/root", rel, object)
    }

    fn record(local_rel: &str, remote_rel: &str, dir: bool) -> DbStorageItem {
        let record = if dir {
            MappedObject::Folder(MappedFolder::new(local_rel, remote_rel, "id-1"))
        } else {
            MappedObject::File(
                MappedFile::new(local_rel, remote_rel, "id-1").with_remote_modified(Some(REMOTE_TIME)),
            )
        };
        DbStorageItem::new(Some(record))
    }

    /// File triplet at `a.txt` with the given existence flags.
    fn file(l: bool, d: bool, r: bool, local_eq_db: bool, remote_time: i64) -> SyncTriplet {
        let db = if d { record("a.txt", "a.txt", false) } else { DbStorageItem::none() };
        SyncTriplet::new(
            local("a.txt", l, false),
            remote("a.txt", r, false, remote_time),
            db,
            local_eq_db,
            TripletOrigin::LocalCrawl,
        )
    }

    #[test]
    fn test_every_existence_combination_has_one_action() {
        let cases = [
            ((false, false, false), SyncAction::NoOp),
            ((true, false, false), SyncAction::UploadNew),
            ((false, false, true), SyncAction::Download),
            ((true, false, true), SyncAction::RecordExisting),
            ((false, true, false), SyncAction::RemoveRecord),
            ((true, true, false), SyncAction::DeleteLocal),
            ((false, true, true), SyncAction::DeleteRemote),
            ((true, true, true), SyncAction::NoOp),
        ];
        for ((l, d, r), expected) in cases {
            let triplet = file(l, d, r, l && d, REMOTE_TIME);
            assert_eq!(classify(&triplet), expected, "L:{l} D:{d} R:{r}");
        }
    }

    #[test]
    fn test_changed_sides_pick_direction() {
        assert_eq!(classify(&file(true, true, true, false, REMOTE_TIME)), SyncAction::UpdateRemote);
        assert_eq!(classify(&file(true, true, true, true, 9_999)), SyncAction::Download);
        assert_eq!(classify(&file(true, true, true, false, 9_999)), SyncAction::Conflict);
    }

    #[test]
    fn test_restores_when_deleted_side_was_changed_elsewhere() {
        assert_eq!(classify(&file(true, true, false, false, REMOTE_TIME)), SyncAction::RestoreRemote);
        assert_eq!(classify(&file(false, true, true, false, 9_999)), SyncAction::RestoreFromRemote);
    }

    #[test]
    fn test_unknown_remote_is_unresolved() {
        let triplet = SyncTriplet::new(
            local("a.txt", true, false),
            RemoteStorageItem::unknown("/root", "a.txt"),
            DbStorageItem::none(),
            false,
            TripletOrigin::Watcher,
        );
        assert_eq!(classify(&triplet), SyncAction::Unresolved);
    }

    #[test]
    fn test_folder_actions() {
        let deleted_remotely = SyncTriplet::new(
            local("dir", true, true),
            remote("dir", false, true, 0),
            record("dir", "dir", true),
            true,
            TripletOrigin::LocalCrawl,
        );
        let action = classify(&deleted_remotely);
        assert_eq!(action, SyncAction::DeleteLocalFolder);
        assert_eq!(action.dependency_order(true), DependencyOrder::ChildrenFirst);

        let new_remote = SyncTriplet::new(
            local("dir", false, false),
            remote("dir", true, true, 0),
            DbStorageItem::none(),
            false,
            TripletOrigin::RemoteCrawl,
        );
        let action = classify(&new_remote);
        assert_eq!(action, SyncAction::CreateLocalFolder);
        assert_eq!(action.dependency_order(true), DependencyOrder::ParentFirst);
    }

    #[test]
    fn test_kind_mismatch_is_conflict() {
        let triplet = SyncTriplet::new(
            local("x", true, false),
            remote("x", true, true, 0),
            DbStorageItem::none(),
            false,
            TripletOrigin::LocalCrawl,
        );
        assert_eq!(classify(&triplet), SyncAction::Conflict);
    }

    #[test]
    fn test_moves() {
        // Renamed locally from old.txt to new.txt.
        let local_move = SyncTriplet::new(
            local("new.txt", true, false),
            remote("old.txt", true, false, REMOTE_TIME),
            record("old.txt", "old.txt", false),
            true,
            TripletOrigin::Watcher,
        );
        assert_eq!(classify(&local_move), SyncAction::MoveRemote);

        // Moved remotely to moved.txt; the local file is still at a.txt.
        let remote_move = SyncTriplet::new(
            local("a.txt", true, false),
            remote("moved.txt", true, false, REMOTE_TIME),
            record("a.txt", "a.txt", false),
            true,
            TripletOrigin::LocalCrawl,
        );
        assert_eq!(classify(&remote_move), SyncAction::MoveLocal);
    }
}
