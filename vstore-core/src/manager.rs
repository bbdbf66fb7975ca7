//! Internal version manager
//!
//! Public entry point of the version storage. Reads go through the item
//! state manager's read lock and the identity cache; mutations run under the
//! event source binding so their notifications are attributed to the actor
//! that requested them.

use async_trait::async_trait;
use std::sync::{Arc, Weak};

use crate::cache::VersionItemCache;
use crate::cluster::{ClusterUpdateBridge, UpdateEventChannel, UpdateEventListener};
use crate::config::VersionManagerConfig;
use crate::disk::SledPersistenceManager;
use crate::error::{Result, VersionError};
use crate::graph::VersionGraphStore;
use crate::id::NodeId;
use crate::ism::VersionItemStateManager;
use crate::item::{
    InternalActivity, InternalVersion, InternalVersionHistory, VersionHistoryInfo, VersionItem,
};
use crate::node::NodeRef;
use crate::observation::{EventState, ObservationDispatcher};
use crate::persistence::{MemoryPersistenceManager, PersistenceManager};
use crate::source::{Actor, EventSourceBinding};
use crate::state::{ChangeLog, ItemState, NodeReferences};

/// Version manager of one repository
pub struct VersionManager {
    config: VersionManagerConfig,
    ism: Arc<VersionItemStateManager>,
    binding: Arc<EventSourceBinding>,
    graph: VersionGraphStore,
    cache: Arc<VersionItemCache>,
    bridge: ClusterUpdateBridge,
}

impl VersionManager {
    /// Open a version manager on top of `persistence`
    pub async fn open(
        config: VersionManagerConfig,
        persistence: Arc<dyn PersistenceManager>,
        dispatcher: Arc<dyn ObservationDispatcher>,
    ) -> Result<Arc<Self>> {
        let ism = Arc::new(VersionItemStateManager::new(
            persistence,
            dispatcher,
            config.storage_roots(),
        ));
        let binding = Arc::new(EventSourceBinding::new(config.system_path.clone()));
        let cache = Arc::new(VersionItemCache::new());
        ism.add_listener(cache.clone());

        let graph = VersionGraphStore::open(ism.clone(), binding.clone(), &config).await?;
        let bridge = ClusterUpdateBridge::new(ism.clone(), binding.clone(), cache.clone());

        tracing::info!(
            "Version manager opened (histories {}, activities {})",
            config.histories_id,
            config.activities_id
        );
        Ok(Arc::new(Self {
            config,
            ism,
            binding,
            graph,
            cache,
            bridge,
        }))
    }

    /// Open a transient version manager
    pub async fn open_in_memory(dispatcher: Arc<dyn ObservationDispatcher>) -> Result<Arc<Self>> {
        Self::open(
            VersionManagerConfig::default(),
            Arc::new(MemoryPersistenceManager::new()),
            dispatcher,
        )
        .await
    }

    /// Open a version manager backed by the sled store at `config.storage_path`
    pub async fn open_on_disk(
        config: VersionManagerConfig,
        dispatcher: Arc<dyn ObservationDispatcher>,
    ) -> Result<Arc<Self>> {
        let persistence = SledPersistenceManager::open_with_config(&config)?;
        Self::open(config, Arc::new(persistence), dispatcher).await
    }

    pub fn config(&self) -> &VersionManagerConfig {
        &self.config
    }

    pub fn cache(&self) -> &VersionItemCache {
        &self.cache
    }

    fn is_storage_root(&self, id: NodeId) -> bool {
        id == self.graph.histories_id() || id == self.graph.activities_id()
    }

    pub async fn create_version_history(
        &self,
        actor: &Actor,
        node: &dyn NodeRef,
        copied_from: Option<NodeId>,
    ) -> Result<VersionHistoryInfo> {
        self.binding
            .run_with_source(actor, self.graph.create_version_history(node, copied_from))
            .await
    }

    pub async fn create_activity(&self, actor: &Actor, title: &str) -> Result<NodeId> {
        self.binding
            .run_with_source(actor, self.graph.create_activity(title))
            .await
    }

    pub async fn remove_activity(&self, actor: &Actor, activity_id: NodeId) -> Result<()> {
        self.binding
            .run_with_source(actor, self.graph.remove_activity(activity_id))
            .await
    }

    /// Whether `id` is a version history, version or activity.
    /// Storage errors are logged and reported as absent.
    pub async fn has_item(&self, id: NodeId) -> bool {
        if self.is_storage_root(id) {
            return false;
        }
        let _lock = self.ism.acquire_read_lock().await;
        if self.cache.contains(id) {
            return true;
        }
        match self.ism.has_item_state(id).await {
            Ok(exists) => exists,
            Err(e) => {
                tracing::warn!("Unable to check for item {}: {}", id, e);
                false
            }
        }
    }

    /// Look up a version item, materializing and caching it on a miss.
    /// Returns `None` for unknown ids and for the storage roots.
    pub async fn get_item(&self, id: NodeId) -> Result<Option<VersionItem>> {
        if self.is_storage_root(id) {
            return Ok(None);
        }
        let _lock = self.ism.acquire_read_lock().await;
        if let Some(item) = self.cache.get(id) {
            return Ok(Some(item));
        }
        if !self.ism.has_item_state(id).await? {
            return Ok(None);
        }
        let state = self.ism.get_item_state(id).await?;
        Ok(VersionItem::from_state(state).map(|item| self.cache.insert_if_absent(item)))
    }

    async fn get_existing(&self, id: NodeId) -> Result<VersionItem> {
        self.get_item(id).await?.ok_or(VersionError::NotFound(id))
    }

    pub async fn get_version_history(&self, id: NodeId) -> Result<Arc<InternalVersionHistory>> {
        self.get_existing(id)
            .await?
            .as_history()
            .cloned()
            .ok_or(VersionError::ItemType { id, expected: "version history" })
    }

    pub async fn get_version(&self, id: NodeId) -> Result<Arc<InternalVersion>> {
        self.get_existing(id)
            .await?
            .as_version()
            .cloned()
            .ok_or(VersionError::ItemType { id, expected: "version" })
    }

    pub async fn get_activity(&self, id: NodeId) -> Result<Arc<InternalActivity>> {
        self.get_existing(id)
            .await?
            .as_activity()
            .cloned()
            .ok_or(VersionError::ItemType { id, expected: "activity" })
    }

    /// History created for a versionable node, if any
    pub async fn get_version_history_of_node(
        &self,
        node_id: NodeId,
    ) -> Result<Option<Arc<InternalVersionHistory>>> {
        let history_id = {
            let _lock = self.ism.acquire_read_lock().await;
            self.graph.history_id_of_node(node_id).await?
        };
        match history_id {
            Some(id) => Ok(Some(self.get_version_history(id).await?)),
            None => Ok(None),
        }
    }

    /// Validate a checkout of `node` under `activity` and return its base
    /// version. Never mutates.
    pub async fn can_checkout(
        &self,
        node: &dyn NodeRef,
        activity: Option<NodeId>,
    ) -> Result<NodeId> {
        let _lock = self.ism.acquire_read_lock().await;
        self.graph.can_checkout(node, activity).await
    }

    /// Check in `node`. Fully versionable nodes name their history; simple
    /// versionable nodes get one created on their first checkin.
    ///
    /// The new version is cached before the binding is released, so a
    /// concurrent checkin that adds it as a predecessor refreshes the cached
    /// object instead of racing with its insertion.
    pub async fn checkin(
        &self,
        actor: &Actor,
        node: &dyn NodeRef,
        created: i64,
    ) -> Result<Arc<InternalVersion>> {
        self.binding
            .run_with_source(actor, async {
                let node_id = node.node_id();
                let (history_id, simple) = if node.is_full_versionable() {
                    let id = node
                        .version_history_id()
                        .ok_or(VersionError::NotVersionable(node_id))?;
                    (id, false)
                } else {
                    let id = match self.graph.history_id_of_node(node_id).await? {
                        Some(id) => id,
                        None => self.graph.create_version_history(node, None).await?.history_id,
                    };
                    (id, true)
                };
                let record = self.graph.checkin(history_id, node, simple, created).await?;
                self.get_version(record.id).await
            })
            .await
    }

    pub async fn remove_version(
        &self,
        actor: &Actor,
        history_id: NodeId,
        name: &str,
    ) -> Result<()> {
        let history = self.get_version_history(history_id).await?;
        if !history.has_version(name) {
            return Err(VersionError::VersionNotFound {
                history: history_id,
                name: name.to_string(),
            });
        }
        self.binding
            .run_with_source(actor, self.graph.remove_version(history_id, name))
            .await
    }

    /// Add, move or (with `version_name == None`) remove a label.
    /// Returns the version the label pointed to before.
    pub async fn set_version_label(
        &self,
        actor: &Actor,
        history_id: NodeId,
        version_name: Option<&str>,
        label: &str,
        move_label: bool,
    ) -> Result<Option<NodeId>> {
        self.binding
            .run_with_source(
                actor,
                self.graph.set_version_label(history_id, version_name, label, move_label),
            )
            .await
    }

    /// Store references from workspace nodes to items of the version storage.
    /// No notifications are sent and nothing is propagated to the cluster.
    pub async fn record_references(&self, references: NodeReferences) -> Result<()> {
        let mut changes = ChangeLog::new();
        changes.modified_references(references);
        self.ism.store_silently(&changes).await
    }

    /// Wire this manager to a cluster channel: local commits are emitted to
    /// it and updates it receives are applied here.
    pub fn set_event_channel(self: &Arc<Self>, channel: Arc<dyn UpdateEventChannel>) {
        self.ism.set_event_channel(channel.clone());
        let weak: Weak<Self> = Arc::downgrade(self);
        let listener: Weak<dyn UpdateEventListener> = weak;
        channel.set_listener(listener);
    }

    /// Items changed underneath this manager
    pub async fn items_updated(&self, ids: &[NodeId]) {
        self.bridge.on_items_updated(ids).await;
    }

    /// Item state as currently persisted, bypassing the cache
    pub async fn get_item_state(&self, id: NodeId) -> Result<ItemState> {
        let _lock = self.ism.acquire_read_lock().await;
        self.ism.get_item_state(id).await
    }

    pub async fn close(&self) -> Result<()> {
        tracing::info!("Closing version manager");
        self.ism.close().await
    }
}

#[async_trait]
impl UpdateEventListener for VersionManager {
    async fn external_update(
        &self,
        changes: ChangeLog,
        events: Vec<EventState>,
        timestamp: i64,
        user_data: Option<String>,
    ) -> Result<()> {
        self.bridge
            .apply_external_update(changes, events, timestamp, user_data)
            .await
    }
}
