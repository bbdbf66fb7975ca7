//! In-memory version items
//!
//! The objects handed out by the version manager. Each wraps the persisted
//! record of its item behind a lock so the cache can refresh it in place when
//! the underlying state changes; holders of an `Arc` keep seeing the current
//! state without re-fetching.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, Weak};

use crate::id::NodeId;
use crate::state::{ActivityRecord, FrozenNode, HistoryRecord, ItemState, VersionRecord};

/// Ids returned by `create_version_history`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionHistoryInfo {
    pub history_id: NodeId,
    pub root_version_id: NodeId,
}

macro_rules! record_accessors {
    ($ty:ident, $record:ty) => {
        impl $ty {
            pub fn new(record: $record) -> Self {
                Self {
                    id: record.id,
                    record: RwLock::new(record),
                }
            }

            pub fn id(&self) -> NodeId {
                self.id
            }

            /// Snapshot of the backing record
            pub fn record(&self) -> $record {
                self.read().clone()
            }

            fn read(&self) -> RwLockReadGuard<'_, $record> {
                self.record.read().unwrap_or_else(PoisonError::into_inner)
            }

            fn replace(&self, record: $record) {
                *self.record.write().unwrap_or_else(PoisonError::into_inner) = record;
            }
        }
    };
}

/// Version history of one versionable node
#[derive(Debug)]
pub struct InternalVersionHistory {
    id: NodeId,
    record: RwLock<HistoryRecord>,
}

record_accessors!(InternalVersionHistory, HistoryRecord);

impl InternalVersionHistory {
    pub fn versionable_id(&self) -> NodeId {
        self.read().versionable_id
    }

    pub fn copied_from(&self) -> Option<NodeId> {
        self.read().copied_from
    }

    pub fn root_version_id(&self) -> NodeId {
        self.read().root_version
    }

    /// Most recently created version
    pub fn latest_version_id(&self) -> NodeId {
        self.read().latest_version()
    }

    pub fn has_version(&self, name: &str) -> bool {
        self.read().has_version(name)
    }

    pub fn version_id(&self, name: &str) -> Option<NodeId> {
        self.read().version_id(name)
    }

    /// Version names in creation order
    pub fn version_names(&self) -> Vec<String> {
        self.read().versions.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn version_count(&self) -> usize {
        self.read().versions.len()
    }

    pub fn labels(&self) -> BTreeMap<String, NodeId> {
        self.read().labels.clone()
    }

    pub fn version_id_by_label(&self, label: &str) -> Option<NodeId> {
        self.read().labels.get(label).copied()
    }

    pub fn labels_of(&self, version: NodeId) -> Vec<String> {
        self.read().labels_of(version)
    }

    /// Replace the in-memory state with a freshly loaded one.
    /// Returns `false` if the state is not a history with this id.
    pub fn reload(&self, state: &ItemState) -> bool {
        match state {
            ItemState::History(h) if h.id == self.id => {
                self.replace(h.clone());
                true
            }
            _ => false,
        }
    }
}

/// A single version
#[derive(Debug)]
pub struct InternalVersion {
    id: NodeId,
    record: RwLock<VersionRecord>,
}

record_accessors!(InternalVersion, VersionRecord);

impl InternalVersion {
    pub fn name(&self) -> String {
        self.read().name.clone()
    }

    pub fn history_id(&self) -> NodeId {
        self.read().history_id
    }

    pub fn created(&self) -> i64 {
        self.read().created
    }

    pub fn is_root(&self) -> bool {
        self.read().is_root()
    }

    pub fn predecessor_ids(&self) -> Vec<NodeId> {
        self.read().predecessors.clone()
    }

    pub fn successor_ids(&self) -> Vec<NodeId> {
        self.read().successors.clone()
    }

    pub fn linear_predecessor_id(&self) -> Option<NodeId> {
        self.read().linear_predecessor()
    }

    pub fn activity_id(&self) -> Option<NodeId> {
        self.read().activity
    }

    pub fn frozen_node(&self) -> FrozenNode {
        self.read().frozen.clone()
    }
}

/// An activity
#[derive(Debug)]
pub struct InternalActivity {
    id: NodeId,
    record: RwLock<ActivityRecord>,
}

record_accessors!(InternalActivity, ActivityRecord);

impl InternalActivity {
    pub fn title(&self) -> String {
        self.read().title.clone()
    }

    /// Latest version checked in under this activity for `history`
    pub fn latest_version_id(&self, history: NodeId) -> Option<NodeId> {
        self.read().latest_version(history)
    }

    pub fn version_ids(&self) -> Vec<NodeId> {
        self.read().versions.iter().map(|e| e.version).collect()
    }
}

/// Any object the version manager hands out
#[derive(Debug, Clone)]
pub enum VersionItem {
    History(Arc<InternalVersionHistory>),
    Version(Arc<InternalVersion>),
    Activity(Arc<InternalActivity>),
}

impl VersionItem {
    /// Materialize an item from its persisted state.
    /// Storage roots are not version items.
    pub fn from_state(state: ItemState) -> Option<Self> {
        match state {
            ItemState::Root(_) => None,
            ItemState::History(h) => {
                Some(VersionItem::History(Arc::new(InternalVersionHistory::new(h))))
            }
            ItemState::Version(v) => Some(VersionItem::Version(Arc::new(InternalVersion::new(v)))),
            ItemState::Activity(a) => {
                Some(VersionItem::Activity(Arc::new(InternalActivity::new(a))))
            }
        }
    }

    pub fn id(&self) -> NodeId {
        match self {
            VersionItem::History(h) => h.id(),
            VersionItem::Version(v) => v.id(),
            VersionItem::Activity(a) => a.id(),
        }
    }

    /// Update the in-memory state from a modified item state.
    /// Returns `false` if the state does not belong to this item.
    pub fn refresh(&self, state: &ItemState) -> bool {
        match (self, state) {
            (VersionItem::History(h), ItemState::History(_)) => h.reload(state),
            (VersionItem::Version(v), ItemState::Version(r)) if r.id == v.id() => {
                v.replace(r.clone());
                true
            }
            (VersionItem::Activity(a), ItemState::Activity(r)) if r.id == a.id() => {
                a.replace(r.clone());
                true
            }
            _ => false,
        }
    }

    pub fn as_history(&self) -> Option<&Arc<InternalVersionHistory>> {
        match self {
            VersionItem::History(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_version(&self) -> Option<&Arc<InternalVersion>> {
        match self {
            VersionItem::Version(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_activity(&self) -> Option<&Arc<InternalActivity>> {
        match self {
            VersionItem::Activity(a) => Some(a),
            _ => None,
        }
    }

    /// Same underlying object (not merely the same id)
    pub fn ptr_eq(&self, other: &VersionItem) -> bool {
        match (self, other) {
            (VersionItem::History(a), VersionItem::History(b)) => Arc::ptr_eq(a, b),
            (VersionItem::Version(a), VersionItem::Version(b)) => Arc::ptr_eq(a, b),
            (VersionItem::Activity(a), VersionItem::Activity(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub(crate) fn downgrade(&self) -> WeakVersionItem {
        match self {
            VersionItem::History(h) => WeakVersionItem::History(Arc::downgrade(h)),
            VersionItem::Version(v) => WeakVersionItem::Version(Arc::downgrade(v)),
            VersionItem::Activity(a) => WeakVersionItem::Activity(Arc::downgrade(a)),
        }
    }
}

/// Weakly held version item, as stored in the cache
#[derive(Debug, Clone)]
pub(crate) enum WeakVersionItem {
    History(Weak<InternalVersionHistory>),
    Version(Weak<InternalVersion>),
    Activity(Weak<InternalActivity>),
}

impl WeakVersionItem {
    pub(crate) fn upgrade(&self) -> Option<VersionItem> {
        match self {
            WeakVersionItem::History(h) => h.upgrade().map(VersionItem::History),
            WeakVersionItem::Version(v) => v.upgrade().map(VersionItem::Version),
            WeakVersionItem::Activity(a) => a.upgrade().map(VersionItem::Activity),
        }
    }
}
