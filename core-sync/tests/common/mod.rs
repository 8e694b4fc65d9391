//! Shared fixtures: an in-memory repository and a connected machine over a
//! temporary local root.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_desktop::TokioFileSystem;
use bridge_traits::error::Result;
use bridge_traits::{
    BridgeError, ChangeEvent, ChangeType, ContentChanges, FixedClock, ObjectProperties,
    OperationContext, RemoteDocument, RemoteFolder, RemoteObject, RemoteRepository,
};
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use core_runtime::config::{CoreConfig, SyncSettings};
use core_store::{create_test_pool, MetadataStore, SqliteMetadataStore};
use core_sync::SyncMachine;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const REMOTE_ROOT: &str = "/sites/docs";
const ROOT_ID: &str = "root";
const EPOCH_MS: i64 = 1_700_000_000_000;

#[derive(Debug, Clone)]
struct Entry {
    name: String,
    parent_id: String,
    is_folder: bool,
    content: Bytes,
    modified: i64,
    checked_out_by: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<String, Entry>,
    changes: Vec<ChangeEvent>,
    next_id: u64,
    tick: i64,
    /// Folder id to the number of tree-walk listings that still fail.
    failing_listings: HashMap<String, usize>,
}

impl State {
    fn now(&mut self) -> i64 {
        self.tick += 1;
        EPOCH_MS + self.tick * 1_000
    }

    fn log(&mut self, object_id: &str, change_type: ChangeType, at: i64) {
        self.changes.push(ChangeEvent {
            object_id: object_id.to_string(),
            change_type,
            change_time: Utc.timestamp_millis_opt(at).unwrap(),
        });
    }

    fn path_of(&self, id: &str) -> Option<String> {
        if id == ROOT_ID {
            return Some(REMOTE_ROOT.to_string());
        }
        let entry = self.entries.get(id)?;
        Some(format!("{}/{}", self.path_of(&entry.parent_id)?, entry.name))
    }

    fn id_of(&self, path: &str) -> Option<String> {
        if path == REMOTE_ROOT {
            return Some(ROOT_ID.to_string());
        }
        self.entries
            .keys()
            .find(|id| self.path_of(id).as_deref() == Some(path))
            .cloned()
    }

    fn object(&self, id: &str) -> Option<RemoteObject> {
        if id == ROOT_ID {
            return Some(RemoteObject::Folder(RemoteFolder {
                id: ROOT_ID.to_string(),
                name: "docs".to_string(),
                path: REMOTE_ROOT.to_string(),
                parent_id: None,
                last_modified: None,
            }));
        }
        let entry = self.entries.get(id)?;
        let path = self.path_of(id)?;
        let last_modified = Utc.timestamp_millis_opt(entry.modified).single();
        Some(if entry.is_folder {
            RemoteObject::Folder(RemoteFolder {
                id: id.to_string(),
                name: entry.name.clone(),
                path,
                parent_id: Some(entry.parent_id.clone()),
                last_modified,
            })
        } else {
            RemoteObject::Document(RemoteDocument {
                id: id.to_string(),
                name: entry.name.clone(),
                path,
                parent_id: Some(entry.parent_id.clone()),
                last_modified,
                content_length: Some(entry.content.len() as u64),
                checked_out_by: entry.checked_out_by.clone(),
            })
        })
    }

    fn ensure_folder(&self, id: &str) -> Result<()> {
        if id == ROOT_ID || self.entries.get(id).is_some_and(|e| e.is_folder) {
            Ok(())
        } else {
            Err(BridgeError::NotFound(format!("folder {id}")))
        }
    }

    fn ensure_free(&self, parent_id: &str, name: &str) -> Result<()> {
        let taken = self
            .entries
            .values()
            .any(|e| e.parent_id == parent_id && e.name == name);
        if taken {
            Err(BridgeError::NameConstraint(name.to_string()))
        } else {
            Ok(())
        }
    }

    fn insert(&mut self, parent_id: &str, name: &str, is_folder: bool, content: Bytes) -> Result<String> {
        self.ensure_folder(parent_id)?;
        self.ensure_free(parent_id, name)?;
        self.next_id += 1;
        let id = format!("obj-{}", self.next_id);
        let modified = self.now();
        self.entries.insert(
            id.clone(),
            Entry {
                name: name.to_string(),
                parent_id: parent_id.to_string(),
                is_folder,
                content,
                modified,
                checked_out_by: None,
            },
        );
        self.log(&id, ChangeType::Created, modified);
        Ok(id)
    }

    fn remove_tree(&mut self, id: &str) {
        let children: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.parent_id == id)
            .map(|(child, _)| child.clone())
            .collect();
        for child in children {
            self.remove_tree(&child);
        }
        if self.entries.remove(id).is_some() {
            let at = self.now();
            self.log(id, ChangeType::Deleted, at);
        }
    }
}

/// Repository double keeping a tree, contents and a change log in memory.
///
/// Object paths are absolute under [`REMOTE_ROOT`]; helper methods used to
/// play "another user" take paths relative to it.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: Mutex<State>,
    calls: AtomicUsize,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn absolute(relative: &str) -> String {
        format!("{REMOTE_ROOT}/{relative}")
    }

    fn parent_id_for(state: &State, relative: &str) -> String {
        match relative.rsplit_once('/') {
            Some((parent, _)) => state
                .id_of(&Self::absolute(parent))
                .unwrap_or_else(|| panic!("no remote folder {parent}")),
            None => ROOT_ID.to_string(),
        }
    }

    /// Create a folder as another user would.
    pub fn add_folder(&self, relative: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let parent = Self::parent_id_for(&state, relative);
        let name = relative.rsplit('/').next().unwrap();
        state.insert(&parent, name, true, Bytes::new()).unwrap()
    }

    /// Create a document as another user would.
    pub fn add_document(&self, relative: &str, content: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let parent = Self::parent_id_for(&state, relative);
        let name = relative.rsplit('/').next().unwrap();
        state
            .insert(&parent, name, false, Bytes::copy_from_slice(content.as_bytes()))
            .unwrap()
    }

    pub fn update_document(&self, relative: &str, content: &str) {
        let mut state = self.state.lock().unwrap();
        let id = state.id_of(&Self::absolute(relative)).unwrap();
        let at = state.now();
        let entry = state.entries.get_mut(&id).unwrap();
        entry.content = Bytes::copy_from_slice(content.as_bytes());
        entry.modified = at;
        state.log(&id, ChangeType::Updated, at);
    }

    pub fn delete(&self, relative: &str) {
        let mut state = self.state.lock().unwrap();
        let id = state.id_of(&Self::absolute(relative)).unwrap();
        state.remove_tree(&id);
    }

    pub fn check_out(&self, relative: &str, user: &str) {
        let mut state = self.state.lock().unwrap();
        let id = state.id_of(&Self::absolute(relative)).unwrap();
        state.entries.get_mut(&id).unwrap().checked_out_by = Some(user.to_string());
    }

    /// Make the next tree-walk listing of a folder (one asking for path
    /// segments) fail with a connection error. Emptiness checks still
    /// succeed.
    pub fn fail_next_listing(&self, relative: &str) {
        let mut state = self.state.lock().unwrap();
        let id = state.id_of(&Self::absolute(relative)).unwrap();
        *state.failing_listings.entry(id).or_default() += 1;
    }

    pub fn id_of(&self, relative: &str) -> Option<String> {
        self.state.lock().unwrap().id_of(&Self::absolute(relative))
    }

    pub fn content(&self, relative: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        let id = state.id_of(&Self::absolute(relative))?;
        let entry = state.entries.get(&id)?;
        Some(String::from_utf8_lossy(&entry.content).into_owned())
    }

    /// Every path below the root, relative and sorted; folders end in `/`.
    pub fn tree(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let prefix = format!("{REMOTE_ROOT}/");
        let mut paths: Vec<String> = state
            .entries
            .iter()
            .filter_map(|(id, entry)| {
                let path = state.path_of(id)?;
                let relative = path.strip_prefix(&prefix)?.to_string();
                Some(if entry.is_folder {
                    format!("{relative}/")
                } else {
                    relative
                })
            })
            .collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl RemoteRepository for InMemoryRepository {
    async fn get_object(&self, id: &str) -> Result<RemoteObject> {
        self.call();
        let state = self.state.lock().unwrap();
        state
            .object(id)
            .ok_or_else(|| BridgeError::NotFound(id.to_string()))
    }

    async fn get_object_by_path(&self, path: &str) -> Result<RemoteObject> {
        self.call();
        let state = self.state.lock().unwrap();
        state
            .id_of(path)
            .and_then(|id| state.object(&id))
            .ok_or_else(|| BridgeError::NotFound(path.to_string()))
    }

    async fn get_children(
        &self,
        folder_id: &str,
        context: &OperationContext,
    ) -> Result<Vec<RemoteObject>> {
        self.call();
        let mut state = self.state.lock().unwrap();
        let failing = state
            .failing_listings
            .get_mut(folder_id)
            .filter(|left| context.include_path_segments && **left > 0);
        if let Some(left) = failing {
            *left -= 1;
            return Err(BridgeError::Connection(format!("listing {folder_id} timed out")));
        }
        state.ensure_folder(folder_id)?;
        let mut children: Vec<(String, String)> = state
            .entries
            .iter()
            .filter(|(_, e)| e.parent_id == folder_id)
            .map(|(id, e)| (e.name.clone(), id.clone()))
            .collect();
        children.sort();
        Ok(children
            .into_iter()
            .filter_map(|(_, id)| state.object(&id))
            .collect())
    }

    async fn get_content_stream(&self, document_id: &str) -> Result<Bytes> {
        self.call();
        let state = self.state.lock().unwrap();
        state
            .entries
            .get(document_id)
            .filter(|e| !e.is_folder)
            .map(|e| e.content.clone())
            .ok_or_else(|| BridgeError::NotFound(document_id.to_string()))
    }

    async fn set_content_stream(
        &self,
        document_id: &str,
        content: Bytes,
        _overwrite: bool,
    ) -> Result<RemoteDocument> {
        self.call();
        let mut state = self.state.lock().unwrap();
        let at = state.now();
        let entry = state
            .entries
            .get_mut(document_id)
            .ok_or_else(|| BridgeError::NotFound(document_id.to_string()))?;
        if entry.checked_out_by.is_some() {
            return Err(BridgeError::CheckedOut(document_id.to_string()));
        }
        entry.content = content;
        entry.modified = at;
        state.log(document_id, ChangeType::Updated, at);
        match state.object(document_id) {
            Some(RemoteObject::Document(document)) => Ok(document),
            _ => Err(BridgeError::NotFound(document_id.to_string())),
        }
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<RemoteFolder> {
        self.call();
        let mut state = self.state.lock().unwrap();
        let id = state.insert(parent_id, name, true, Bytes::new())?;
        match state.object(&id) {
            Some(RemoteObject::Folder(folder)) => Ok(folder),
            _ => Err(BridgeError::OperationFailed(id)),
        }
    }

    async fn create_document(
        &self,
        parent_id: &str,
        name: &str,
        content: Bytes,
    ) -> Result<RemoteDocument> {
        self.call();
        let mut state = self.state.lock().unwrap();
        let id = state.insert(parent_id, name, false, content)?;
        match state.object(&id) {
            Some(RemoteObject::Document(document)) => Ok(document),
            _ => Err(BridgeError::OperationFailed(id)),
        }
    }

    async fn move_object(
        &self,
        object_id: &str,
        _source_folder_id: &str,
        target_folder_id: &str,
    ) -> Result<RemoteObject> {
        self.call();
        let mut state = self.state.lock().unwrap();
        state.ensure_folder(target_folder_id)?;
        let name = state
            .entries
            .get(object_id)
            .map(|e| e.name.clone())
            .ok_or_else(|| BridgeError::NotFound(object_id.to_string()))?;
        state.ensure_free(target_folder_id, &name)?;
        let at = state.now();
        if let Some(entry) = state.entries.get_mut(object_id) {
            entry.parent_id = target_folder_id.to_string();
            entry.modified = at;
        }
        state.log(object_id, ChangeType::Updated, at);
        state
            .object(object_id)
            .ok_or_else(|| BridgeError::NotFound(object_id.to_string()))
    }

    async fn update_properties(
        &self,
        object_id: &str,
        properties: &ObjectProperties,
    ) -> Result<RemoteObject> {
        self.call();
        let mut state = self.state.lock().unwrap();
        let parent = state
            .entries
            .get(object_id)
            .map(|e| e.parent_id.clone())
            .ok_or_else(|| BridgeError::NotFound(object_id.to_string()))?;
        if let Some(name) = &properties.name {
            state.ensure_free(&parent, name)?;
            let at = state.now();
            if let Some(entry) = state.entries.get_mut(object_id) {
                entry.name = name.clone();
                entry.modified = at;
            }
            state.log(object_id, ChangeType::Updated, at);
        }
        state
            .object(object_id)
            .ok_or_else(|| BridgeError::NotFound(object_id.to_string()))
    }

    async fn delete_tree(&self, folder_id: &str) -> Result<()> {
        self.call();
        let mut state = self.state.lock().unwrap();
        if !state.entries.contains_key(folder_id) {
            return Err(BridgeError::NotFound(folder_id.to_string()));
        }
        state.remove_tree(folder_id);
        Ok(())
    }

    async fn delete_all_versions(&self, document_id: &str) -> Result<()> {
        self.call();
        let mut state = self.state.lock().unwrap();
        match state.entries.get(document_id) {
            None => return Err(BridgeError::NotFound(document_id.to_string())),
            Some(entry) if entry.checked_out_by.is_some() => {
                return Err(BridgeError::CheckedOut(document_id.to_string()))
            }
            Some(_) => {}
        }
        state.remove_tree(document_id);
        Ok(())
    }

    async fn latest_change_log_token(&self) -> Result<Option<String>> {
        self.call();
        let state = self.state.lock().unwrap();
        Ok(Some(state.changes.len().to_string()))
    }

    async fn get_content_changes(
        &self,
        token: &str,
        _include_properties: bool,
        max_items: u32,
    ) -> Result<ContentChanges> {
        self.call();
        let state = self.state.lock().unwrap();
        let start: usize = token
            .parse()
            .map_err(|_| BridgeError::OperationFailed(format!("bad token {token}")))?;
        let start = start.min(state.changes.len());
        let end = (start + max_items as usize).min(state.changes.len());
        Ok(ContentChanges {
            events: state.changes[start..end].to_vec(),
            next_token: Some(end.to_string()),
            has_more: end < state.changes.len(),
        })
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    _dir: TempDir,
    pub local_root: PathBuf,
    pub repository: Arc<InMemoryRepository>,
    pub store: Arc<SqliteMetadataStore>,
    pub machine: SyncMachine,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_settings(SyncSettings::default().with_grace_delay(std::time::Duration::from_millis(20))).await
    }

    pub async fn with_settings(settings: SyncSettings) -> Self {
        Self::with_repository(Arc::new(InMemoryRepository::new()), settings).await
    }

    pub async fn with_repository(repository: Arc<InMemoryRepository>, settings: SyncSettings) -> Self {
        let dir = TempDir::new().unwrap();
        let local_root = dir.path().join("local");
        let store = Arc::new(SqliteMetadataStore::new(create_test_pool().await.unwrap()));

        let config = CoreConfig::builder()
            .local_root(local_root.clone())
            .remote_root(REMOTE_ROOT)
            .database_path(dir.path().join("sync.db"))
            .user_name("alice")
            .sync_settings(settings)
            .file_system(Arc::new(TokioFileSystem::new()))
            .clock(Arc::new(FixedClock::from_millis(EPOCH_MS)))
            .build()
            .unwrap();

        let machine = SyncMachine::connect(
            &config,
            Arc::clone(&repository) as Arc<dyn RemoteRepository>,
            Arc::clone(&store) as Arc<dyn MetadataStore>,
            None,
        )
        .await
        .unwrap();

        Self {
            _dir: dir,
            local_root,
            repository,
            store,
            machine,
        }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.local_root.join(relative)
    }

    pub fn write(&self, relative: &str, content: &str) {
        let path = self.path(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    pub fn read(&self, relative: &str) -> Option<String> {
        std::fs::read_to_string(self.path(relative)).ok()
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.path(relative).exists()
    }

    /// Every path below the local root, relative and sorted; folders end
    /// in `/`.
    pub fn local_tree(&self) -> Vec<String> {
        fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) {
            for entry in std::fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                let relative = path
                    .strip_prefix(root)
                    .unwrap()
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                if path.is_dir() {
                    out.push(format!("{relative}/"));
                    walk(root, &path, out);
                } else {
                    out.push(relative);
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.local_root, &self.local_root, &mut out);
        out.sort();
        out
    }
}
