//! Persistence abstraction for the version storage
//!
//! The version manager never touches storage directly; it hands atomic
//! [`ChangeLog`]s to a [`PersistenceManager`] and reads item states back by id.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use crate::error::{StorageError, StorageResult};
use crate::id::NodeId;
use crate::state::{ChangeLog, ItemState, NodeReferences};

/// Transactional item store keyed by stable ids
///
/// All backends must implement this trait
#[async_trait]
pub trait PersistenceManager: Send + Sync {
    /// Load an item state by id
    async fn load(&self, id: NodeId) -> StorageResult<ItemState>;

    /// Check if an item state exists
    async fn exists(&self, id: NodeId) -> StorageResult<bool>;

    /// Load the references pointing at `target`
    async fn load_references(&self, target: NodeId) -> StorageResult<NodeReferences>;

    /// Check if any reference points at `target`
    async fn exists_references(&self, target: NodeId) -> StorageResult<bool>;

    /// Apply a change log atomically
    async fn store(&self, changes: &ChangeLog) -> StorageResult<()>;

    /// Release underlying resources
    async fn close(&self) -> StorageResult<()>;
}

/// In-memory persistence manager
///
/// Used for tests and for transient repositories. A change log is applied
/// under a single write guard, so readers never see half of it.
pub struct MemoryPersistenceManager {
    items: RwLock<HashMap<NodeId, ItemState>>,
    references: RwLock<HashMap<NodeId, NodeReferences>>,
    closed: AtomicBool,
}

impl MemoryPersistenceManager {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            references: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of stored items
    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    fn check_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

impl Default for MemoryPersistenceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceManager for MemoryPersistenceManager {
    async fn load(&self, id: NodeId) -> StorageResult<ItemState> {
        self.check_open()?;
        self.items
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound(id))
    }

    async fn exists(&self, id: NodeId) -> StorageResult<bool> {
        self.check_open()?;
        Ok(self.items.read().await.contains_key(&id))
    }

    async fn load_references(&self, target: NodeId) -> StorageResult<NodeReferences> {
        self.check_open()?;
        Ok(self
            .references
            .read()
            .await
            .get(&target)
            .cloned()
            .unwrap_or_else(|| NodeReferences::new(target)))
    }

    async fn exists_references(&self, target: NodeId) -> StorageResult<bool> {
        self.check_open()?;
        Ok(self
            .references
            .read()
            .await
            .get(&target)
            .is_some_and(NodeReferences::has_references))
    }

    async fn store(&self, changes: &ChangeLog) -> StorageResult<()> {
        self.check_open()?;

        // Take both guards up front so the whole log lands at once
        let mut items = self.items.write().await;
        let mut references = self.references.write().await;

        for state in changes.added_states().iter().chain(changes.modified_states()) {
            items.insert(state.id(), state.clone());
        }
        for state in changes.deleted_states() {
            items.remove(&state.id());
        }
        for refs in changes.reference_updates() {
            if refs.has_references() {
                references.insert(refs.target, refs.clone());
            } else {
                references.remove(&refs.target);
            }
        }

        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{PropertyId, SYSTEM_NODE_ID};
    use crate::state::{RootKind, RootRecord};

    fn root() -> ItemState {
        ItemState::Root(RootRecord::new(NodeId::new_random(), SYSTEM_NODE_ID, RootKind::Histories))
    }

    #[tokio::test]
    async fn test_memory_store_and_load() {
        let pm = MemoryPersistenceManager::new();
        let state = root();
        let mut log = ChangeLog::new();
        log.added(state.clone());
        pm.store(&log).await.unwrap();

        assert!(pm.exists(state.id()).await.unwrap());
        assert_eq!(pm.load(state.id()).await.unwrap(), state);
    }

    #[tokio::test]
    async fn test_memory_delete() {
        let pm = MemoryPersistenceManager::new();
        let state = root();
        let mut log = ChangeLog::new();
        log.added(state.clone());
        pm.store(&log).await.unwrap();

        let mut log = ChangeLog::new();
        log.deleted(state.clone());
        pm.store(&log).await.unwrap();

        assert!(matches!(pm.load(state.id()).await, Err(StorageError::NotFound(_))));
        assert!(pm.is_empty().await);
    }

    #[tokio::test]
    async fn test_memory_references() {
        let pm = MemoryPersistenceManager::new();
        let target = NodeId::new_random();
        assert!(!pm.exists_references(target).await.unwrap());

        let mut refs = NodeReferences::new(target);
        refs.add_reference(PropertyId::new(NodeId::new_random(), "jcr:activity"));
        let mut log = ChangeLog::new();
        log.modified_references(refs.clone());
        pm.store(&log).await.unwrap();

        assert!(pm.exists_references(target).await.unwrap());
        assert_eq!(pm.load_references(target).await.unwrap(), refs);

        // Empty reference sets are dropped
        let mut log = ChangeLog::new();
        log.modified_references(NodeReferences::new(target));
        pm.store(&log).await.unwrap();
        assert!(!pm.exists_references(target).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_closed() {
        let pm = MemoryPersistenceManager::new();
        pm.close().await.unwrap();
        assert!(matches!(pm.exists(NodeId::new_random()).await, Err(StorageError::Closed)));
    }
}
