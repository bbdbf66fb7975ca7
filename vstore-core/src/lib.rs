//! VStore Core Library
//!
//! Internal version manager of a hierarchical content repository:
//! - Version histories, versions and activities kept in a dedicated sub-tree
//! - Checkin, checkout validation, labels and version removal
//! - Weak identity cache of version items with event-driven eviction
//! - Shared read lock / exclusive write lock over the item states
//! - Event source binding for attributing change notifications
//! - Cluster update emission and application
//! - In-memory and sled-backed persistence

pub mod cache;
pub mod cluster;
pub mod config;
pub mod disk;
pub mod error;
pub mod graph;
pub mod id;
pub mod ism;
pub mod item;
pub mod locking;
pub mod manager;
pub mod node;
pub mod observation;
pub mod persistence;
pub mod source;
pub mod state;

pub use cache::VersionItemCache;
pub use cluster::{
    ClusterUpdate, ClusterUpdateBridge, QueuedUpdateChannel, UpdateEventChannel,
    UpdateEventListener,
};
pub use config::VersionManagerConfig;
pub use disk::SledPersistenceManager;
pub use error::{ActivityViolation, Result, StorageError, StorageResult, VersionError};
pub use graph::VersionGraphStore;
pub use id::{NodeId, PropertyId, ACTIVITIES_NODE_ID, HISTORIES_NODE_ID, SYSTEM_NODE_ID};
pub use ism::{ItemStateListener, VersionItemStateManager};
pub use item::{
    InternalActivity, InternalVersion, InternalVersionHistory, VersionHistoryInfo, VersionItem,
};
pub use locking::{ItemStateLocking, ReadLock, WriteLock};
pub use manager::VersionManager;
pub use node::NodeRef;
pub use observation::{
    BroadcastDispatcher, EventKind, EventState, EventStateCollection, ObservationDispatcher,
};
pub use persistence::{MemoryPersistenceManager, PersistenceManager};
pub use source::{Actor, EventSourceBinding};
pub use state::{
    ActivityEntry, ActivityRecord, ChangeLog, FrozenNode, HistoryRecord, ItemState, NodeReferences,
    RootKind, RootRecord, StorageRoots, VersionRecord, ROOT_VERSION_NAME,
};
