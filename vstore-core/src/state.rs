//! Persisted item states of the version storage
//!
//! The version storage is a small tree below `/jcr:system`:
//!
//! ```text
//! jcr:versionStorage (RootRecord, Histories)
//!   <history>          (HistoryRecord)
//!     <version>        (VersionRecord)
//! jcr:activities     (RootRecord, Activities)
//!   <activity>         (ActivityRecord)
//! ```
//!
//! Records are serialized with bincode. All mutations are grouped into a
//! [`ChangeLog`] that the persistence collaborator applies atomically.

use crate::id::{NodeId, PropertyId, ACTIVITIES_NODE_ID, HISTORIES_NODE_ID};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the implicit first version of every history
pub const ROOT_VERSION_NAME: &str = "jcr:rootVersion";

/// Which storage root a [`RootRecord`] represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootKind {
    Histories,
    Activities,
}

/// Ids of the histories root and the activities root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRoots {
    pub histories: NodeId,
    pub activities: NodeId,
}

impl Default for StorageRoots {
    fn default() -> Self {
        Self {
            histories: HISTORIES_NODE_ID,
            activities: ACTIVITIES_NODE_ID,
        }
    }
}

/// One of the two storage roots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootRecord {
    pub id: NodeId,
    pub parent: NodeId,
    pub kind: RootKind,
    /// Histories root: versionable node id -> history id.
    /// Activities root: activity id -> activity id.
    pub entries: BTreeMap<NodeId, NodeId>,
}

impl RootRecord {
    pub fn new(id: NodeId, parent: NodeId, kind: RootKind) -> Self {
        Self {
            id,
            parent,
            kind,
            entries: BTreeMap::new(),
        }
    }
}

/// Snapshot of a versionable node taken at checkin
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrozenNode {
    pub primary_type: String,
    pub properties: BTreeMap<String, String>,
}

impl FrozenNode {
    pub fn new(primary_type: impl Into<String>) -> Self {
        Self {
            primary_type: primary_type.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}

/// Version history of one versionable node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: NodeId,
    /// Node this history was created for
    pub versionable_id: NodeId,
    /// Version the node was copied from, if any
    pub copied_from: Option<NodeId>,
    pub root_version: NodeId,
    /// (name, id) in creation order; names are unique
    pub versions: Vec<(String, NodeId)>,
    /// label -> version id
    pub labels: BTreeMap<String, NodeId>,
}

impl HistoryRecord {
    pub fn has_version(&self, name: &str) -> bool {
        self.versions.iter().any(|(n, _)| n == name)
    }

    pub fn version_id(&self, name: &str) -> Option<NodeId> {
        self.versions
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, id)| *id)
    }

    pub fn version_name(&self, id: NodeId) -> Option<&str> {
        self.versions
            .iter()
            .find(|(_, v)| *v == id)
            .map(|(n, _)| n.as_str())
    }

    /// Most recently created version (the root version for a fresh history)
    pub fn latest_version(&self) -> NodeId {
        self.versions
            .last()
            .map(|(_, id)| *id)
            .unwrap_or(self.root_version)
    }

    /// Labels currently pointing at the given version
    pub fn labels_of(&self, version: NodeId) -> Vec<String> {
        self.labels
            .iter()
            .filter(|(_, v)| **v == version)
            .map(|(l, _)| l.clone())
            .collect()
    }
}

/// A single version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub id: NodeId,
    pub history_id: NodeId,
    pub name: String,
    /// Creation time (Unix milliseconds)
    pub created: i64,
    /// First entry is the linear predecessor
    pub predecessors: Vec<NodeId>,
    pub successors: Vec<NodeId>,
    pub activity: Option<NodeId>,
    pub frozen: FrozenNode,
}

impl VersionRecord {
    pub fn is_root(&self) -> bool {
        self.predecessors.is_empty()
    }

    pub fn linear_predecessor(&self) -> Option<NodeId> {
        self.predecessors.first().copied()
    }
}

/// Version recorded by an activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub history: NodeId,
    pub version: NodeId,
}

/// Activity grouping checkins across histories and workspaces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: NodeId,
    pub title: String,
    pub created: i64,
    /// Versions checked in under this activity, in checkin order
    pub versions: Vec<ActivityEntry>,
}

impl ActivityRecord {
    /// Latest version checked in under this activity for the given history
    pub fn latest_version(&self, history: NodeId) -> Option<NodeId> {
        self.versions
            .iter()
            .rev()
            .find(|e| e.history == history)
            .map(|e| e.version)
    }
}

/// Any persisted item of the version storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ItemState {
    Root(RootRecord),
    History(HistoryRecord),
    Version(VersionRecord),
    Activity(ActivityRecord),
}

impl ItemState {
    pub fn id(&self) -> NodeId {
        match self {
            ItemState::Root(r) => r.id,
            ItemState::History(h) => h.id,
            ItemState::Version(v) => v.id,
            ItemState::Activity(a) => a.id,
        }
    }

    /// Parent in the version storage tree below `roots`
    pub fn parent_id(&self, roots: &StorageRoots) -> NodeId {
        match self {
            ItemState::Root(r) => r.parent,
            ItemState::History(_) => roots.histories,
            ItemState::Version(v) => v.history_id,
            ItemState::Activity(_) => roots.activities,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ItemState::Root(_) => "storage root",
            ItemState::History(_) => "version history",
            ItemState::Version(_) => "version",
            ItemState::Activity(_) => "activity",
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

/// Reverse reference index entry: all properties that reference `target`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReferences {
    pub target: NodeId,
    pub references: Vec<PropertyId>,
}

impl NodeReferences {
    pub fn new(target: NodeId) -> Self {
        Self {
            target,
            references: Vec::new(),
        }
    }

    pub fn add_reference(&mut self, source: PropertyId) {
        if !self.references.contains(&source) {
            self.references.push(source);
        }
    }

    pub fn remove_reference(&mut self, source: &PropertyId) -> bool {
        let before = self.references.len();
        self.references.retain(|r| r != source);
        before != self.references.len()
    }

    pub fn has_references(&self) -> bool {
        !self.references.is_empty()
    }
}

/// Atomic batch of item mutations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeLog {
    added: Vec<ItemState>,
    modified: Vec<ItemState>,
    deleted: Vec<ItemState>,
    references: Vec<NodeReferences>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn added(&mut self, state: ItemState) {
        self.added.push(state);
    }

    /// Record a modification; a later modification of the same item
    /// replaces the earlier one.
    pub fn modified(&mut self, state: ItemState) {
        let id = state.id();
        if let Some(added) = self.added.iter_mut().find(|s| s.id() == id) {
            *added = state;
        } else if let Some(existing) = self.modified.iter_mut().find(|s| s.id() == id) {
            *existing = state;
        } else {
            self.modified.push(state);
        }
    }

    pub fn deleted(&mut self, state: ItemState) {
        let id = state.id();
        self.modified.retain(|s| s.id() != id);
        self.deleted.push(state);
    }

    pub fn modified_references(&mut self, refs: NodeReferences) {
        if let Some(existing) = self.references.iter_mut().find(|r| r.target == refs.target) {
            *existing = refs;
        } else {
            self.references.push(refs);
        }
    }

    pub fn added_states(&self) -> &[ItemState] {
        &self.added
    }

    pub fn modified_states(&self) -> &[ItemState] {
        &self.modified
    }

    pub fn deleted_states(&self) -> &[ItemState] {
        &self.deleted
    }

    pub fn reference_updates(&self) -> &[NodeReferences] {
        &self.references
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.references.is_empty()
    }

    /// Ids of every item touched by this log
    pub fn item_ids(&self) -> Vec<NodeId> {
        self.added
            .iter()
            .chain(self.modified.iter())
            .chain(self.deleted.iter())
            .map(ItemState::id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(history: NodeId, name: &str, preds: Vec<NodeId>) -> VersionRecord {
        VersionRecord {
            id: NodeId::new_random(),
            history_id: history,
            name: name.to_string(),
            created: 0,
            predecessors: preds,
            successors: Vec::new(),
            activity: None,
            frozen: FrozenNode::new("nt:unstructured"),
        }
    }

    #[test]
    fn test_item_state_serialization() {
        let history = NodeId::new_random();
        let v = version(history, "1.0", vec![NodeId::new_random()]);
        let state = ItemState::Version(v.clone());
        let bytes = state.to_bytes().unwrap();
        let decoded = ItemState::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, state);
        assert_eq!(decoded.parent_id(&StorageRoots::default()), history);
    }

    #[test]
    fn test_change_log_modified_replaces() {
        let history = NodeId::new_random();
        let mut v = version(history, "1.0", vec![]);
        let mut log = ChangeLog::new();
        log.modified(ItemState::Version(v.clone()));
        v.successors.push(NodeId::new_random());
        log.modified(ItemState::Version(v.clone()));

        assert_eq!(log.modified_states().len(), 1);
        assert_eq!(log.modified_states()[0], ItemState::Version(v));
    }

    #[test]
    fn test_change_log_modify_after_add_folds_into_add() {
        let mut v = version(NodeId::new_random(), "1.0", vec![]);
        let mut log = ChangeLog::new();
        log.added(ItemState::Version(v.clone()));
        v.name = "1.1".to_string();
        log.modified(ItemState::Version(v.clone()));

        assert!(log.modified_states().is_empty());
        assert_eq!(log.added_states(), &[ItemState::Version(v)]);
    }

    #[test]
    fn test_history_lookups() {
        let root = NodeId::new_random();
        let v1 = NodeId::new_random();
        let mut history = HistoryRecord {
            id: NodeId::new_random(),
            versionable_id: NodeId::new_random(),
            copied_from: None,
            root_version: root,
            versions: vec![(ROOT_VERSION_NAME.to_string(), root), ("1.0".to_string(), v1)],
            labels: BTreeMap::new(),
        };
        history.labels.insert("stable".to_string(), v1);

        assert_eq!(history.latest_version(), v1);
        assert_eq!(history.version_id("1.0"), Some(v1));
        assert_eq!(history.version_name(root), Some(ROOT_VERSION_NAME));
        assert_eq!(history.labels_of(v1), vec!["stable".to_string()]);
        assert!(!history.has_version("1.1"));
    }

    #[test]
    fn test_activity_latest_version_per_history() {
        let h1 = NodeId::new_random();
        let h2 = NodeId::new_random();
        let (a, b, c) = (NodeId::new_random(), NodeId::new_random(), NodeId::new_random());
        let activity = ActivityRecord {
            id: NodeId::new_random(),
            title: "feature".to_string(),
            created: 0,
            versions: vec![
                ActivityEntry { history: h1, version: a },
                ActivityEntry { history: h2, version: b },
                ActivityEntry { history: h1, version: c },
            ],
        };
        assert_eq!(activity.latest_version(h1), Some(c));
        assert_eq!(activity.latest_version(h2), Some(b));
        assert_eq!(activity.latest_version(NodeId::new_random()), None);
    }

    #[test]
    fn test_parent_follows_configured_roots() {
        let roots = StorageRoots {
            histories: NodeId::new_random(),
            activities: NodeId::new_random(),
        };
        let root = NodeId::new_random();
        let history = ItemState::History(HistoryRecord {
            id: NodeId::new_random(),
            versionable_id: NodeId::new_random(),
            copied_from: None,
            root_version: root,
            versions: vec![(ROOT_VERSION_NAME.to_string(), root)],
            labels: BTreeMap::new(),
        });
        let activity = ItemState::Activity(ActivityRecord {
            id: NodeId::new_random(),
            title: "feature".to_string(),
            created: 0,
            versions: Vec::new(),
        });
        assert_eq!(history.parent_id(&roots), roots.histories);
        assert_eq!(activity.parent_id(&roots), roots.activities);
        assert_eq!(history.parent_id(&StorageRoots::default()), HISTORIES_NODE_ID);
    }

    #[test]
    fn test_node_references() {
        let mut refs = NodeReferences::new(NodeId::new_random());
        let source = PropertyId::new(NodeId::new_random(), "jcr:activity");
        refs.add_reference(source.clone());
        refs.add_reference(source.clone());
        assert_eq!(refs.references.len(), 1);
        assert!(refs.remove_reference(&source));
        assert!(!refs.has_references());
    }
}
