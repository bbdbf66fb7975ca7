//! Cluster update propagation for the version storage
//!
//! Local commits are emitted to an [`UpdateEventChannel`] as
//! [`ClusterUpdate`]s. The transport carries them to the other cluster nodes,
//! where they come back in through [`UpdateEventListener::external_update`]
//! and are applied by the [`ClusterUpdateBridge`] without being re-emitted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tokio::sync::mpsc;

use crate::cache::VersionItemCache;
use crate::error::{Result, StorageError};
use crate::id::NodeId;
use crate::ism::VersionItemStateManager;
use crate::item::VersionItem;
use crate::observation::EventState;
use crate::source::EventSourceBinding;
use crate::state::ChangeLog;

/// Maximum encoded update size (64 MB).
pub const MAX_UPDATE_SIZE: usize = 64 * 1024 * 1024;

/// One committed change log as shipped between cluster nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterUpdate {
    pub changes: ChangeLog,
    pub events: Vec<EventState>,
    /// Commit time on the originating node (Unix milliseconds)
    pub timestamp: i64,
    pub user_data: Option<String>,
}

impl ClusterUpdate {
    /// Serialize with a 4-byte little-endian length prefix
    pub fn encode(&self) -> std::result::Result<Vec<u8>, StorageError> {
        let payload = bincode::serialize(self)?;
        if payload.len() > MAX_UPDATE_SIZE {
            return Err(StorageError::Serialization(format!(
                "Update too large: {} bytes (max {})",
                payload.len(),
                MAX_UPDATE_SIZE
            )));
        }
        let mut buf = Vec::with_capacity(4 + payload.len());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Deserialize a length-prefixed update
    pub fn decode(data: &[u8]) -> std::result::Result<Self, StorageError> {
        let (prefix, payload) = data.split_at_checked(4).ok_or_else(|| {
            StorageError::Serialization("Update shorter than its length prefix".to_string())
        })?;
        let mut len = [0u8; 4];
        len.copy_from_slice(prefix);
        let len = u32::from_le_bytes(len) as usize;
        if len > MAX_UPDATE_SIZE {
            return Err(StorageError::Serialization(format!(
                "Update too large: {} bytes (max {})",
                len, MAX_UPDATE_SIZE
            )));
        }
        if len != payload.len() {
            return Err(StorageError::Serialization(format!(
                "Update length mismatch: prefix says {}, got {}",
                len,
                payload.len()
            )));
        }
        Ok(bincode::deserialize(payload)?)
    }
}

/// Receives updates that originated on another cluster node
#[async_trait]
pub trait UpdateEventListener: Send + Sync {
    async fn external_update(
        &self,
        changes: ChangeLog,
        events: Vec<EventState>,
        timestamp: i64,
        user_data: Option<String>,
    ) -> Result<()>;
}

/// Link between the version storage and the cluster transport
pub trait UpdateEventChannel: Send + Sync {
    /// A local change log was committed
    fn update_committed(&self, update: ClusterUpdate);

    /// Register the listener for updates arriving from other nodes
    fn set_listener(&self, listener: Weak<dyn UpdateEventListener>);
}

/// Channel that queues outgoing updates for a transport task
pub struct QueuedUpdateChannel {
    outgoing: mpsc::UnboundedSender<ClusterUpdate>,
    listener: RwLock<Option<Weak<dyn UpdateEventListener>>>,
}

impl QueuedUpdateChannel {
    /// Create a channel and the receiving end of its outgoing queue
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClusterUpdate>) {
        let (outgoing, rx) = mpsc::unbounded_channel();
        let channel = Self {
            outgoing,
            listener: RwLock::new(None),
        };
        (channel, rx)
    }

    /// Hand an update received from another node to the bound listener
    pub async fn deliver(&self, update: ClusterUpdate) -> Result<()> {
        let listener = self
            .listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade);
        match listener {
            Some(listener) => {
                listener
                    .external_update(
                        update.changes,
                        update.events,
                        update.timestamp,
                        update.user_data,
                    )
                    .await
            }
            None => {
                tracing::warn!("dropping cluster update: no listener bound");
                Ok(())
            }
        }
    }
}

impl UpdateEventChannel for QueuedUpdateChannel {
    fn update_committed(&self, update: ClusterUpdate) {
        if self.outgoing.send(update).is_err() {
            tracing::warn!("cluster transport is gone; update not propagated");
        }
    }

    fn set_listener(&self, listener: Weak<dyn UpdateEventListener>) {
        *self.listener.write().unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }
}

/// Converges local state with changes made elsewhere
pub struct ClusterUpdateBridge {
    ism: Arc<VersionItemStateManager>,
    binding: Arc<EventSourceBinding>,
    cache: Arc<VersionItemCache>,
}

impl ClusterUpdateBridge {
    pub fn new(
        ism: Arc<VersionItemStateManager>,
        binding: Arc<EventSourceBinding>,
        cache: Arc<VersionItemCache>,
    ) -> Self {
        Self { ism, binding, cache }
    }

    /// Apply a remote change log locally. Notifications are attributed to
    /// no local actor and carry the remote timestamp and user data.
    pub async fn apply_external_update(
        &self,
        changes: ChangeLog,
        events: Vec<EventState>,
        timestamp: i64,
        user_data: Option<String>,
    ) -> Result<()> {
        let mut esc = self.binding.create_event_collection_for(None);
        esc.add_all(events);
        esc.set_timestamp(timestamp);
        esc.set_user_data(user_data);
        self.ism.external_update(changes, esc).await
    }

    /// Items were changed underneath the cache. Cached version histories are
    /// reloaded in place so existing holders keep a current object; any other
    /// cached item is evicted. A failed reload is logged and evicts.
    pub async fn on_items_updated(&self, ids: &[NodeId]) {
        let _lock = self.ism.acquire_read_lock().await;
        for &id in ids {
            match self.cache.get(id) {
                Some(VersionItem::History(history)) => match self.ism.get_item_state(id).await {
                    Ok(state) if history.reload(&state) => {
                        tracing::debug!("reloaded version history {}", id);
                    }
                    Ok(state) => {
                        tracing::warn!(
                            "Unable to update version history {}: found {}",
                            id,
                            state.kind_name()
                        );
                        self.cache.remove(id);
                    }
                    Err(e) => {
                        tracing::warn!("Unable to update version history {}: {}", id, e);
                        self.cache.remove(id);
                    }
                },
                Some(_) => {
                    self.cache.remove(id);
                }
                None => {}
            }
        }
    }
}
