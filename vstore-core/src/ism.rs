//! Item state manager of the version storage
//!
//! Sits between the version graph and the persistence collaborator:
//! - applies change logs under the exclusive write lock,
//! - notifies item state listeners while the write lock is still held, so
//!   no reader can observe a destroyed item through a listener's cache,
//! - dispatches notifications and emits local changes to the cluster channel
//!   after the lock is released.

use std::sync::{Arc, PoisonError, RwLock};

use crate::cluster::{ClusterUpdate, UpdateEventChannel};
use crate::error::{Result, VersionError};
use crate::id::NodeId;
use crate::locking::{ItemStateLocking, ReadLock};
use crate::observation::{EventStateCollection, ObservationDispatcher};
use crate::persistence::PersistenceManager;
use crate::state::{ChangeLog, ItemState, NodeReferences, StorageRoots};

/// Receives item state lifecycle callbacks.
///
/// Callbacks run synchronously while the write lock is held; they must not
/// acquire the item state lock or block on I/O.
pub trait ItemStateListener: Send + Sync {
    fn state_created(&self, _created: &ItemState) {}

    fn state_modified(&self, _modified: &ItemState) {}

    fn state_destroyed(&self, destroyed: &ItemState);
}

/// Shared item state manager for the version storage
pub struct VersionItemStateManager {
    persistence: Arc<dyn PersistenceManager>,
    dispatcher: Arc<dyn ObservationDispatcher>,
    roots: StorageRoots,
    locking: ItemStateLocking,
    listeners: RwLock<Vec<Arc<dyn ItemStateListener>>>,
    channel: RwLock<Option<Arc<dyn UpdateEventChannel>>>,
}

impl VersionItemStateManager {
    pub fn new(
        persistence: Arc<dyn PersistenceManager>,
        dispatcher: Arc<dyn ObservationDispatcher>,
        roots: StorageRoots,
    ) -> Self {
        Self {
            persistence,
            dispatcher,
            roots,
            locking: ItemStateLocking::new(),
            listeners: RwLock::new(Vec::new()),
            channel: RwLock::new(None),
        }
    }

    pub fn persistence(&self) -> &Arc<dyn PersistenceManager> {
        &self.persistence
    }

    /// Storage roots that notifications are parented under
    pub fn roots(&self) -> &StorageRoots {
        &self.roots
    }

    /// Acquire the shared read lock of this manager
    pub async fn acquire_read_lock(&self) -> ReadLock<'_> {
        self.locking.acquire_read_lock().await
    }

    pub fn add_listener(&self, listener: Arc<dyn ItemStateListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Emit committed local changes to `channel` from now on
    pub fn set_event_channel(&self, channel: Arc<dyn UpdateEventChannel>) {
        *self.channel.write().unwrap_or_else(PoisonError::into_inner) = Some(channel);
    }

    fn event_channel(&self) -> Option<Arc<dyn UpdateEventChannel>> {
        self.channel
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn has_item_state(&self, id: NodeId) -> Result<bool> {
        Ok(self.persistence.exists(id).await?)
    }

    pub async fn get_item_state(&self, id: NodeId) -> Result<ItemState> {
        self.persistence
            .load(id)
            .await
            .map_err(VersionError::from_storage)
    }

    pub async fn has_node_references(&self, id: NodeId) -> Result<bool> {
        Ok(self.persistence.exists_references(id).await?)
    }

    pub async fn get_node_references(&self, id: NodeId) -> Result<NodeReferences> {
        Ok(self.persistence.load_references(id).await?)
    }

    /// Write a change log straight to persistence, without notifications.
    /// Used for bootstrapping the storage roots and recording references.
    pub async fn store_silently(&self, changes: &ChangeLog) -> Result<()> {
        let _lock = self.locking.acquire_write_lock().await;
        self.persistence.store(changes).await?;
        Ok(())
    }

    /// Apply a local change log on behalf of the source of `events`
    pub async fn store(&self, changes: ChangeLog, mut events: EventStateCollection) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        events.create_events(&changes, &self.roots);

        {
            let _lock = self.locking.acquire_write_lock().await;
            self.persistence.store(&changes).await?;
            self.notify_listeners(&changes);
        }

        if let Some(channel) = self.event_channel() {
            channel.update_committed(ClusterUpdate {
                changes,
                events: events.events().to_vec(),
                timestamp: events.timestamp(),
                user_data: events.user_data().map(str::to_string),
            });
        }
        self.dispatcher.dispatch(events);
        Ok(())
    }

    /// Apply a change log that originated on another cluster node.
    /// Nothing is emitted back to the cluster channel.
    pub async fn external_update(
        &self,
        changes: ChangeLog,
        events: EventStateCollection,
    ) -> Result<()> {
        {
            let _lock = self.locking.acquire_write_lock().await;
            self.persistence.store(&changes).await?;
            self.notify_listeners(&changes);
        }
        tracing::debug!(
            "applied external update ({} items, {} events)",
            changes.item_ids().len(),
            events.events().len()
        );
        self.dispatcher.dispatch(events);
        Ok(())
    }

    fn notify_listeners(&self, changes: &ChangeLog) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in &listeners {
            for state in changes.added_states() {
                listener.state_created(state);
            }
            for state in changes.modified_states() {
                listener.state_modified(state);
            }
            for state in changes.deleted_states() {
                listener.state_destroyed(state);
            }
        }
    }

    pub async fn close(&self) -> Result<()> {
        self.persistence.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::SYSTEM_NODE_ID;
    use crate::observation::BroadcastDispatcher;
    use crate::persistence::MemoryPersistenceManager;
    use crate::source::Actor;
    use crate::state::{RootKind, RootRecord};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(&'static str, NodeId)>>,
    }

    impl ItemStateListener for Recorder {
        fn state_created(&self, created: &ItemState) {
            self.seen.lock().unwrap().push(("created", created.id()));
        }

        fn state_modified(&self, modified: &ItemState) {
            self.seen.lock().unwrap().push(("modified", modified.id()));
        }

        fn state_destroyed(&self, destroyed: &ItemState) {
            self.seen.lock().unwrap().push(("destroyed", destroyed.id()));
        }
    }

    fn root() -> ItemState {
        ItemState::Root(RootRecord::new(NodeId::new_random(), SYSTEM_NODE_ID, RootKind::Histories))
    }

    fn manager() -> (VersionItemStateManager, Arc<BroadcastDispatcher>) {
        let dispatcher = Arc::new(BroadcastDispatcher::new(16));
        let ism = VersionItemStateManager::new(
            Arc::new(MemoryPersistenceManager::new()),
            dispatcher.clone(),
            StorageRoots::default(),
        );
        (ism, dispatcher)
    }

    #[tokio::test]
    async fn test_store_notifies_and_dispatches() {
        let (ism, dispatcher) = manager();
        let recorder = Arc::new(Recorder::default());
        ism.add_listener(recorder.clone());
        let mut rx = dispatcher.subscribe();

        let state = root();
        let mut log = ChangeLog::new();
        log.added(state.clone());
        let events = EventStateCollection::new(Some(Actor::new("alice", "default")), "/jcr:system");
        ism.store(log, events).await.unwrap();

        assert!(ism.has_item_state(state.id()).await.unwrap());
        assert_eq!(recorder.seen.lock().unwrap().as_slice(), &[("created", state.id())]);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.events().len(), 1);
        assert_eq!(received.source().unwrap().user_id, "alice");
    }

    #[tokio::test]
    async fn test_store_silently_skips_listeners() {
        let (ism, _dispatcher) = manager();
        let recorder = Arc::new(Recorder::default());
        ism.add_listener(recorder.clone());

        let mut log = ChangeLog::new();
        log.added(root());
        ism.store_silently(&log).await.unwrap();
        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_missing_item_is_not_found() {
        let (ism, _dispatcher) = manager();
        let id = NodeId::new_random();
        assert!(matches!(ism.get_item_state(id).await, Err(VersionError::NotFound(x)) if x == id));
    }
}
