//! Ordered buffer of remote-crawl results shared with the assembler.
//!
//! The remote crawler inserts, the assembler takes. Both go through one
//! coarse lock, and the insertion order is kept so that leftover
//! remote-only entries come out parents first.

use crate::items::RemoteStorageItem;
use core_async::sync::Mutex;
use std::collections::HashMap;

#[derive(Debug)]
enum Slot {
    Waiting(RemoteStorageItem),
    /// Already handled by the assembler; late inserts are ignored.
    Processed,
}

#[derive(Debug, Default)]
struct Inner {
    order: Vec<String>,
    slots: HashMap<String, Slot>,
}

/// Outcome of [`RemoteBuffer::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Another entry already holds the same key.
    Collision,
    /// The assembler resolved this name before the crawler reached it.
    AlreadyProcessed,
}

#[derive(Debug)]
pub struct RemoteBuffer {
    fold_case: bool,
    inner: Mutex<Inner>,
}

impl RemoteBuffer {
    pub fn new(fold_case: bool) -> Self {
        Self {
            fold_case,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Buffer key of a triplet name.
    pub fn key(&self, name: &str) -> String {
        if self.fold_case {
            name.to_lowercase()
        } else {
            name.to_string()
        }
    }

    pub async fn insert(&self, name: &str, item: RemoteStorageItem) -> InsertOutcome {
        let key = self.key(name);
        let mut inner = self.inner.lock().await;
        match inner.slots.get(&key) {
            Some(Slot::Waiting(_)) => InsertOutcome::Collision,
            Some(Slot::Processed) => InsertOutcome::AlreadyProcessed,
            None => {
                inner.slots.insert(key.clone(), Slot::Waiting(item));
                inner.order.push(key);
                InsertOutcome::Inserted
            }
        }
    }

    /// Take the entry for `name`, leaving a tombstone.
    pub async fn take(&self, name: &str) -> Option<RemoteStorageItem> {
        let key = self.key(name);
        let mut inner = self.inner.lock().await;
        if !matches!(inner.slots.get(&key), Some(Slot::Waiting(_))) {
            return None;
        }
        match inner.slots.insert(key, Slot::Processed) {
            Some(Slot::Waiting(item)) => Some(item),
            _ => None,
        }
    }

    /// Take the entry for `name`, or tombstone the key so that a later
    /// insert is ignored.
    pub async fn take_or_mark(&self, name: &str) -> Option<RemoteStorageItem> {
        let key = self.key(name);
        let mut inner = self.inner.lock().await;
        match inner.slots.insert(key.clone(), Slot::Processed) {
            Some(Slot::Waiting(item)) => Some(item),
            Some(Slot::Processed) => None,
            None => {
                inner.order.push(key);
                None
            }
        }
    }

    /// Remove and return every entry nobody took, in insertion order.
    pub async fn drain_waiting(&self) -> Vec<RemoteStorageItem> {
        let mut inner = self.inner.lock().await;
        let order = std::mem::take(&mut inner.order);
        let mut slots = std::mem::take(&mut inner.slots);
        order
            .into_iter()
            .filter_map(|key| match slots.remove(&key) {
                Some(Slot::Waiting(item)) => Some(item),
                _ => None,
            })
            .collect()
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.order.clear();
        inner.slots.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.slots.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
