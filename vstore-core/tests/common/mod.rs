//! Shared helpers for the version manager integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use vstore_core::{
    Actor, BroadcastDispatcher, FrozenNode, MemoryPersistenceManager, NodeId, NodeRef,
    VersionManager, VersionManagerConfig,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn alice() -> Actor {
    Actor::new("alice", "default")
}

/// Node ids present in one workspace
#[derive(Default)]
pub struct Workspace {
    nodes: Mutex<HashSet<NodeId>>,
}

impl Workspace {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, id: NodeId) {
        self.nodes.lock().unwrap().insert(id);
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.lock().unwrap().contains(&id)
    }
}

/// Versionable node living in a test workspace
pub struct TestNode {
    pub id: NodeId,
    pub full: bool,
    pub history: Option<NodeId>,
    pub base: Option<NodeId>,
    pub predecessors: Vec<NodeId>,
    pub activity: Option<NodeId>,
    pub title: String,
    pub workspace: Arc<Workspace>,
}

impl TestNode {
    pub fn new(workspace: &Arc<Workspace>) -> Self {
        let id = NodeId::new_random();
        workspace.add(id);
        Self {
            id,
            full: true,
            history: None,
            base: None,
            predecessors: Vec::new(),
            activity: None,
            title: "draft".to_string(),
            workspace: workspace.clone(),
        }
    }

    /// A simple versionable node (history looked up by node identity)
    pub fn simple(workspace: &Arc<Workspace>) -> Self {
        Self {
            full: false,
            ..Self::new(workspace)
        }
    }
}

impl NodeRef for TestNode {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn is_full_versionable(&self) -> bool {
        self.full
    }

    fn version_history_id(&self) -> Option<NodeId> {
        self.history
    }

    fn base_version_id(&self) -> Option<NodeId> {
        self.base
    }

    fn predecessor_ids(&self) -> Vec<NodeId> {
        self.predecessors.clone()
    }

    fn activity_id(&self) -> Option<NodeId> {
        self.activity
    }

    fn frozen_node(&self) -> FrozenNode {
        FrozenNode::new("nt:unstructured").with_property("title", self.title.clone())
    }

    fn has_node(&self, id: NodeId) -> bool {
        self.workspace.contains(id)
    }
}

pub struct Fixture {
    pub manager: Arc<VersionManager>,
    pub persistence: Arc<MemoryPersistenceManager>,
    pub dispatcher: Arc<BroadcastDispatcher>,
}

pub async fn fixture() -> Fixture {
    init_tracing();
    let persistence = Arc::new(MemoryPersistenceManager::new());
    let dispatcher = Arc::new(BroadcastDispatcher::new(256));
    let manager = VersionManager::open(
        VersionManagerConfig::default(),
        persistence.clone(),
        dispatcher.clone(),
    )
    .await
    .unwrap();
    Fixture {
        manager,
        persistence,
        dispatcher,
    }
}

/// Create a history for `node` and point the node at its root version
pub async fn versioned(manager: &VersionManager, node: &mut TestNode) -> NodeId {
    let info = manager.create_version_history(&alice(), &*node, None).await.unwrap();
    node.history = Some(info.history_id);
    node.base = Some(info.root_version_id);
    info.history_id
}

/// Check in `node` and move its base to the new version
pub async fn checkin(manager: &VersionManager, node: &mut TestNode) -> NodeId {
    let version = manager
        .checkin(&alice(), &*node, chrono::Utc::now().timestamp_millis())
        .await
        .unwrap();
    node.base = Some(version.id());
    node.predecessors.clear();
    version.id()
}
