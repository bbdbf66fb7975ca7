//! Identity cache of version items
//!
//! Maps stable ids to the objects already handed out, so every caller sees
//! the same `Arc` for the same item while anyone still holds it. Entries are
//! weak: once the last strong reference is dropped the entry is dead and the
//! next lookup materializes a fresh object.
//!
//! Eviction is never time-based. The cache listens to the item state manager
//! and, synchronously within the notification,
//! - evicts items whose state was destroyed,
//! - refreshes items whose state was modified.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::id::NodeId;
use crate::ism::ItemStateListener;
use crate::item::{VersionItem, WeakVersionItem};
use crate::state::ItemState;

/// Weak-valued map from id to version item
#[derive(Default)]
pub struct VersionItemCache {
    items: Mutex<HashMap<NodeId, WeakVersionItem>>,
}

impl VersionItemCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> MutexGuard<'_, HashMap<NodeId, WeakVersionItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a live item
    pub fn get(&self, id: NodeId) -> Option<VersionItem> {
        let mut items = self.items();
        match items.get(&id).map(WeakVersionItem::upgrade) {
            Some(Some(item)) => Some(item),
            Some(None) => {
                items.remove(&id);
                None
            }
            None => None,
        }
    }

    /// Insert or replace an item
    pub fn put(&self, item: &VersionItem) {
        self.items().insert(item.id(), item.downgrade());
    }

    /// Insert `item` unless a live item with the same id is already cached;
    /// returns whichever item ends up cached.
    pub fn insert_if_absent(&self, item: VersionItem) -> VersionItem {
        let mut items = self.items();
        if let Some(existing) = items.get(&item.id()).and_then(WeakVersionItem::upgrade) {
            return existing;
        }
        items.insert(item.id(), item.downgrade());
        item
    }

    /// Evict an item, returning it if it was still alive
    pub fn remove(&self, id: NodeId) -> Option<VersionItem> {
        self.items().remove(&id).and_then(|w| w.upgrade())
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Number of entries, including dead ones not yet purged
    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    /// Drop entries whose items are no longer referenced
    pub fn purge(&self) -> usize {
        let mut items = self.items();
        let before = items.len();
        items.retain(|_, w| w.upgrade().is_some());
        before - items.len()
    }
}

impl ItemStateListener for VersionItemCache {
    fn state_modified(&self, modified: &ItemState) {
        if let Some(item) = self.get(modified.id()) {
            if !item.refresh(modified) {
                // Type changed under the same id; never serve the old object
                self.remove(modified.id());
            }
        }
    }

    fn state_destroyed(&self, destroyed: &ItemState) {
        if self.remove(destroyed.id()).is_some() {
            tracing::trace!("evicted destroyed item {}", destroyed.id());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ActivityRecord, ItemState};

    fn activity(title: &str) -> ActivityRecord {
        ActivityRecord {
            id: NodeId::new_random(),
            title: title.to_string(),
            created: 0,
            versions: Vec::new(),
        }
    }

    fn item(record: ActivityRecord) -> VersionItem {
        VersionItem::from_state(ItemState::Activity(record)).unwrap()
    }

    #[test]
    fn test_put_get_remove() {
        let cache = VersionItemCache::new();
        let a = item(activity("a"));
        cache.put(&a);
        assert!(cache.get(a.id()).unwrap().ptr_eq(&a));
        assert!(cache.remove(a.id()).is_some());
        assert!(cache.get(a.id()).is_none());
    }

    #[test]
    fn test_entries_are_weak() {
        let cache = VersionItemCache::new();
        let a = item(activity("a"));
        let id = a.id();
        cache.put(&a);
        drop(a);
        assert!(cache.get(id).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_insert_if_absent_keeps_existing() {
        let cache = VersionItemCache::new();
        let record = activity("a");
        let first = item(record.clone());
        let second = item(record);
        cache.put(&first);
        let winner = cache.insert_if_absent(second);
        assert!(winner.ptr_eq(&first));
    }

    #[test]
    fn test_listener_evicts_and_refreshes() {
        let cache = VersionItemCache::new();
        let mut record = activity("before");
        let a = item(record.clone());
        cache.put(&a);

        record.title = "after".to_string();
        cache.state_modified(&ItemState::Activity(record.clone()));
        assert_eq!(a.as_activity().unwrap().title(), "after");
        assert!(cache.contains(a.id()));

        cache.state_destroyed(&ItemState::Activity(record));
        assert!(!cache.contains(a.id()));
    }

    #[test]
    fn test_purge() {
        let cache = VersionItemCache::new();
        let a = item(activity("a"));
        let b = item(activity("b"));
        cache.put(&a);
        cache.put(&b);
        drop(b);
        assert_eq!(cache.purge(), 1);
        assert_eq!(cache.len(), 1);
    }
}
