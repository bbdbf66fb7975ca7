//! Version graph store
//!
//! Structural operations on the version storage: histories, versions with
//! their predecessor/successor edges, labels and activities. Every mutating
//! operation builds one [`ChangeLog`] and commits it through the item state
//! manager, attributed to the actor bound by the [`EventSourceBinding`].
//!
//! Mutations must run inside `EventSourceBinding::run_with_source`; reads
//! done here take no lock of their own.

use std::sync::Arc;

use crate::config::VersionManagerConfig;
use crate::error::{ActivityViolation, Result, VersionError};
use crate::id::NodeId;
use crate::ism::VersionItemStateManager;
use crate::item::VersionHistoryInfo;
use crate::node::NodeRef;
use crate::source::EventSourceBinding;
use crate::state::{
    ActivityEntry, ActivityRecord, ChangeLog, FrozenNode, HistoryRecord, ItemState, RootKind,
    RootRecord, VersionRecord, ROOT_VERSION_NAME,
};

/// Name of the first version checked in after the root version
const FIRST_VERSION_NAME: &str = "1.0";

/// Persistent version histories, versions and activities
pub struct VersionGraphStore {
    ism: Arc<VersionItemStateManager>,
    binding: Arc<EventSourceBinding>,
    histories_id: NodeId,
    activities_id: NodeId,
}

impl VersionGraphStore {
    /// Open the graph, creating the storage roots if they do not exist yet
    pub async fn open(
        ism: Arc<VersionItemStateManager>,
        binding: Arc<EventSourceBinding>,
        config: &VersionManagerConfig,
    ) -> Result<Self> {
        let mut changes = ChangeLog::new();
        if !ism.has_item_state(config.histories_id).await? {
            tracing::info!("Creating version storage root {}", config.histories_id);
            changes.added(ItemState::Root(RootRecord::new(
                config.histories_id,
                config.system_id,
                RootKind::Histories,
            )));
        }
        if !ism.has_item_state(config.activities_id).await? {
            tracing::info!("Creating activities root {}", config.activities_id);
            changes.added(ItemState::Root(RootRecord::new(
                config.activities_id,
                config.system_id,
                RootKind::Activities,
            )));
        }
        if !changes.is_empty() {
            ism.store_silently(&changes).await?;
        }

        Ok(Self {
            ism,
            binding,
            histories_id: config.histories_id,
            activities_id: config.activities_id,
        })
    }

    pub fn histories_id(&self) -> NodeId {
        self.histories_id
    }

    pub fn activities_id(&self) -> NodeId {
        self.activities_id
    }

    async fn commit(&self, changes: ChangeLog) -> Result<()> {
        let events = self.binding.create_event_collection()?;
        self.ism.store(changes, events).await
    }

    async fn load_root(&self, id: NodeId) -> Result<RootRecord> {
        match self.ism.get_item_state(id).await? {
            ItemState::Root(r) => Ok(r),
            _ => Err(VersionError::ItemType { id, expected: "storage root" }),
        }
    }

    pub async fn load_history(&self, id: NodeId) -> Result<HistoryRecord> {
        match self.ism.get_item_state(id).await? {
            ItemState::History(h) => Ok(h),
            _ => Err(VersionError::ItemType { id, expected: "version history" }),
        }
    }

    pub async fn load_version(&self, id: NodeId) -> Result<VersionRecord> {
        match self.ism.get_item_state(id).await? {
            ItemState::Version(v) => Ok(v),
            _ => Err(VersionError::ItemType { id, expected: "version" }),
        }
    }

    pub async fn load_activity(&self, id: NodeId) -> Result<ActivityRecord> {
        match self.ism.get_item_state(id).await? {
            ItemState::Activity(a) => Ok(a),
            _ => Err(VersionError::ItemType { id, expected: "activity" }),
        }
    }

    /// History created for the given versionable node, if any
    pub async fn history_id_of_node(&self, node_id: NodeId) -> Result<Option<NodeId>> {
        let root = self.load_root(self.histories_id).await?;
        Ok(root.entries.get(&node_id).copied())
    }

    /// Create the history of `node` together with its root version
    pub async fn create_version_history(
        &self,
        node: &dyn NodeRef,
        copied_from: Option<NodeId>,
    ) -> Result<VersionHistoryInfo> {
        let node_id = node.node_id();
        let mut root = self.load_root(self.histories_id).await?;
        if root.entries.contains_key(&node_id) {
            return Err(VersionError::AlreadyExists(node_id));
        }

        let history_id = NodeId::new_random();
        let root_version_id = NodeId::new_random();
        let root_version = VersionRecord {
            id: root_version_id,
            history_id,
            name: ROOT_VERSION_NAME.to_string(),
            created: chrono::Utc::now().timestamp_millis(),
            predecessors: Vec::new(),
            successors: Vec::new(),
            activity: None,
            frozen: FrozenNode::new(node.frozen_node().primary_type),
        };
        let history = HistoryRecord {
            id: history_id,
            versionable_id: node_id,
            copied_from,
            root_version: root_version_id,
            versions: vec![(ROOT_VERSION_NAME.to_string(), root_version_id)],
            labels: Default::default(),
        };
        root.entries.insert(node_id, history_id);

        let mut changes = ChangeLog::new();
        changes.added(ItemState::History(history));
        changes.added(ItemState::Version(root_version));
        changes.modified(ItemState::Root(root));
        self.commit(changes).await?;

        tracing::debug!("Created version history {} for node {}", history_id, node_id);
        Ok(VersionHistoryInfo {
            history_id,
            root_version_id,
        })
    }

    /// Check in `node` as a new version of `history_id`
    pub async fn checkin(
        &self,
        history_id: NodeId,
        node: &dyn NodeRef,
        simple: bool,
        created: i64,
    ) -> Result<VersionRecord> {
        let mut history = self.load_history(history_id).await?;

        let mut predecessor_ids = if simple {
            vec![history.latest_version()]
        } else {
            let explicit = node.predecessor_ids();
            if explicit.is_empty() {
                let base = node
                    .base_version_id()
                    .ok_or_else(|| VersionError::NotVersionable(node.node_id()))?;
                vec![base]
            } else {
                explicit
            }
        };
        dedup_in_order(&mut predecessor_ids);

        let mut predecessors = Vec::with_capacity(predecessor_ids.len());
        for &id in &predecessor_ids {
            if history.version_name(id).is_none() {
                return Err(VersionError::ForeignVersion {
                    history: history_id,
                    version: id,
                });
            }
            predecessors.push(self.load_version(id).await?);
        }

        let name = next_version_name(&history, &predecessors);
        let version = VersionRecord {
            id: NodeId::new_random(),
            history_id,
            name: name.clone(),
            created,
            predecessors: predecessor_ids,
            successors: Vec::new(),
            activity: node.activity_id(),
            frozen: node.frozen_node(),
        };

        let mut changes = ChangeLog::new();
        for mut pred in predecessors {
            pred.successors.push(version.id);
            changes.modified(ItemState::Version(pred));
        }
        history.versions.push((name.clone(), version.id));
        changes.modified(ItemState::History(history));

        if let Some(activity_id) = version.activity {
            let mut activity = self.load_activity(activity_id).await?;
            activity.versions.push(ActivityEntry {
                history: history_id,
                version: version.id,
            });
            changes.modified(ItemState::Activity(activity));
        }
        changes.added(ItemState::Version(version.clone()));
        self.commit(changes).await?;

        tracing::debug!("Checked in version {} ({}) of history {}", name, version.id, history_id);
        Ok(version)
    }

    /// Validate a checkout of `node` under `activity`; returns the base version
    pub async fn can_checkout(
        &self,
        node: &dyn NodeRef,
        activity: Option<NodeId>,
    ) -> Result<NodeId> {
        let base = node
            .base_version_id()
            .ok_or_else(|| VersionError::NotVersionable(node.node_id()))?;
        let Some(activity_id) = activity else {
            return Ok(base);
        };

        // A referencing node missing from this workspace means another
        // workspace has something checked out under the activity
        if self.ism.has_node_references(activity_id).await? {
            let refs = self.ism.get_node_references(activity_id).await?;
            if let Some(foreign) = refs.references.iter().find(|r| !node.has_node(r.parent)) {
                return Err(ActivityViolation::ForeignWorkspace {
                    activity: activity_id,
                    node: foreign.parent,
                }
                .into());
            }
        }

        let activity = self.load_activity(activity_id).await?;
        let history_id = self.load_version(base).await?.history_id;
        let Some(latest) = activity.latest_version(history_id) else {
            return Ok(base);
        };

        let mut current = Some(base);
        while let Some(id) = current {
            if id == latest {
                return Ok(base);
            }
            current = self.load_version(id).await?.linear_predecessor();
        }

        let name = self.load_version(latest).await?.name;
        Err(ActivityViolation::DivergentBranch {
            activity: activity_id,
            version: name,
        }
        .into())
    }

    /// Remove a version, splicing its neighbours together
    pub async fn remove_version(&self, history_id: NodeId, name: &str) -> Result<()> {
        let mut history = self.load_history(history_id).await?;
        let version_id = history
            .version_id(name)
            .ok_or_else(|| VersionError::VersionNotFound {
                history: history_id,
                name: name.to_string(),
            })?;
        if version_id == history.root_version {
            return Err(VersionError::RootVersionRemoval(history_id));
        }
        if self.ism.has_node_references(version_id).await? {
            return Err(VersionError::ReferentialIntegrity(version_id));
        }

        let version = self.load_version(version_id).await?;
        let mut changes = ChangeLog::new();
        for &pred_id in &version.predecessors {
            let mut pred = self.load_version(pred_id).await?;
            splice(&mut pred.successors, version_id, &version.successors);
            changes.modified(ItemState::Version(pred));
        }
        for &succ_id in &version.successors {
            let mut succ = self.load_version(succ_id).await?;
            splice(&mut succ.predecessors, version_id, &version.predecessors);
            changes.modified(ItemState::Version(succ));
        }

        let dropped = history.labels_of(version_id);
        if !dropped.is_empty() {
            tracing::debug!("Dropping labels {:?} of removed version {}", dropped, name);
        }
        history.versions.retain(|(_, id)| *id != version_id);
        history.labels.retain(|_, id| *id != version_id);
        changes.modified(ItemState::History(history));

        if let Some(activity_id) = version.activity {
            if self.ism.has_item_state(activity_id).await? {
                let mut activity = self.load_activity(activity_id).await?;
                activity.versions.retain(|e| e.version != version_id);
                changes.modified(ItemState::Activity(activity));
            }
        }
        changes.deleted(ItemState::Version(version));
        self.commit(changes).await?;

        tracing::debug!("Removed version {} of history {}", name, history_id);
        Ok(())
    }

    /// Add, move or remove (`version_name == None`) a label.
    /// Returns the version the label pointed to before.
    pub async fn set_version_label(
        &self,
        history_id: NodeId,
        version_name: Option<&str>,
        label: &str,
        move_label: bool,
    ) -> Result<Option<NodeId>> {
        let mut history = self.load_history(history_id).await?;
        let previous = history.labels.get(label).copied();

        match version_name {
            None => {
                if previous.is_none() {
                    return Err(VersionError::LabelNotFound {
                        history: history_id,
                        label: label.to_string(),
                    });
                }
                history.labels.remove(label);
            }
            Some(name) => {
                let version_id = history
                    .version_id(name)
                    .ok_or_else(|| VersionError::VersionNotFound {
                        history: history_id,
                        name: name.to_string(),
                    })?;
                if let Some(prev) = previous {
                    if !move_label {
                        return Err(VersionError::LabelConflict {
                            label: label.to_string(),
                            version: history.version_name(prev).unwrap_or_default().to_string(),
                        });
                    }
                }
                history.labels.insert(label.to_string(), version_id);
            }
        }

        let mut changes = ChangeLog::new();
        changes.modified(ItemState::History(history));
        self.commit(changes).await?;

        tracing::debug!("Set label {} of history {} to {:?}", label, history_id, version_name);
        Ok(previous)
    }

    pub async fn create_activity(&self, title: &str) -> Result<NodeId> {
        let mut root = self.load_root(self.activities_id).await?;
        let activity = ActivityRecord {
            id: NodeId::new_random(),
            title: title.to_string(),
            created: chrono::Utc::now().timestamp_millis(),
            versions: Vec::new(),
        };
        let id = activity.id;
        root.entries.insert(id, id);

        let mut changes = ChangeLog::new();
        changes.added(ItemState::Activity(activity));
        changes.modified(ItemState::Root(root));
        self.commit(changes).await?;

        tracing::debug!("Created activity {} ({})", id, title);
        Ok(id)
    }

    /// Remove an activity that no workspace references any more
    pub async fn remove_activity(&self, activity_id: NodeId) -> Result<()> {
        let activity = self.load_activity(activity_id).await?;
        if self.ism.has_node_references(activity_id).await? {
            return Err(VersionError::ReferentialIntegrity(activity_id));
        }

        let mut changes = ChangeLog::new();
        for entry in &activity.versions {
            if !self.ism.has_item_state(entry.version).await? {
                continue;
            }
            let mut version = self.load_version(entry.version).await?;
            if version.activity == Some(activity_id) {
                version.activity = None;
                changes.modified(ItemState::Version(version));
            }
        }
        let mut root = self.load_root(self.activities_id).await?;
        root.entries.remove(&activity_id);
        changes.modified(ItemState::Root(root));
        changes.deleted(ItemState::Activity(activity));
        self.commit(changes).await?;

        tracing::debug!("Removed activity {}", activity_id);
        Ok(())
    }
}

/// Name for a version created from `predecessors`.
///
/// The predecessor with the fewest name segments is the base (the root
/// version always wins). Its last segment is incremented; if that name is
/// taken, `.0` is appended to the base until a free name is found.
fn next_version_name(history: &HistoryRecord, predecessors: &[VersionRecord]) -> String {
    let best = predecessors
        .iter()
        .min_by_key(|p| if p.is_root() { 0 } else { p.name.split('.').count() });

    let base = match best {
        Some(p) if !p.is_root() => p.name.clone(),
        _ => FIRST_VERSION_NAME.to_string(),
    };
    let mut name = match best {
        Some(p) if !p.is_root() => increment_last_segment(&p.name),
        _ => FIRST_VERSION_NAME.to_string(),
    };
    if history.has_version(&name) {
        name = base;
        loop {
            name.push_str(".0");
            if !history.has_version(&name) {
                break;
            }
        }
    }
    name
}

fn increment_last_segment(name: &str) -> String {
    let (head, last) = match name.rsplit_once('.') {
        Some((head, last)) => (Some(head), last),
        None => (None, name),
    };
    match (head, last.parse::<u64>()) {
        (Some(head), Ok(n)) => format!("{}.{}", head, n + 1),
        (None, Ok(n)) => (n + 1).to_string(),
        (_, Err(_)) => format!("{}.1", name),
    }
}

fn dedup_in_order(ids: &mut Vec<NodeId>) {
    let mut seen = std::collections::HashSet::new();
    ids.retain(|id| seen.insert(*id));
}

/// Replace `removed` in `ids` by `replacement`, keeping the position and
/// dropping duplicates
fn splice(ids: &mut Vec<NodeId>, removed: NodeId, replacement: &[NodeId]) {
    let mut spliced = Vec::with_capacity(ids.len() + replacement.len());
    for &id in ids.iter() {
        if id == removed {
            spliced.extend_from_slice(replacement);
        } else {
            spliced.push(id);
        }
    }
    dedup_in_order(&mut spliced);
    *ids = spliced;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::BroadcastDispatcher;
    use crate::persistence::MemoryPersistenceManager;
    use crate::state::StorageRoots;

    fn record(name: &str, root: bool) -> VersionRecord {
        VersionRecord {
            id: NodeId::new_random(),
            history_id: NodeId::new_random(),
            name: name.to_string(),
            created: 0,
            predecessors: if root { Vec::new() } else { vec![NodeId::new_random()] },
            successors: Vec::new(),
            activity: None,
            frozen: FrozenNode::default(),
        }
    }

    fn history_with(names: &[&str]) -> HistoryRecord {
        let root = NodeId::new_random();
        let mut versions = vec![(ROOT_VERSION_NAME.to_string(), root)];
        versions.extend(names.iter().map(|n| (n.to_string(), NodeId::new_random())));
        HistoryRecord {
            id: NodeId::new_random(),
            versionable_id: NodeId::new_random(),
            copied_from: None,
            root_version: root,
            versions,
            labels: Default::default(),
        }
    }

    #[test]
    fn test_increment_last_segment() {
        assert_eq!(increment_last_segment("1.0"), "1.1");
        assert_eq!(increment_last_segment("1.9"), "1.10");
        assert_eq!(increment_last_segment("1.2.0"), "1.2.1");
        assert_eq!(increment_last_segment("7"), "8");
        assert_eq!(increment_last_segment("draft"), "draft.1");
    }

    #[test]
    fn test_version_naming() {
        let root = record(ROOT_VERSION_NAME, true);
        assert_eq!(next_version_name(&history_with(&[]), &[root.clone()]), "1.0");
        // root still wins over a longer name in a merge
        assert_eq!(
            next_version_name(&history_with(&["1.0"]), &[record("1.0", false), root]),
            "1.0.0"
        );

        let v10 = record("1.0", false);
        assert_eq!(next_version_name(&history_with(&["1.0"]), &[v10.clone()]), "1.1");
        // branching off 1.0 once 1.1 exists
        assert_eq!(next_version_name(&history_with(&["1.0", "1.1"]), &[v10.clone()]), "1.0.0");
        assert_eq!(
            next_version_name(&history_with(&["1.0", "1.1", "1.0.0"]), &[v10]),
            "1.0.0.0"
        );
    }

    #[test]
    fn test_splice() {
        let (a, b, x, c, d) = (
            NodeId::new_random(),
            NodeId::new_random(),
            NodeId::new_random(),
            NodeId::new_random(),
            NodeId::new_random(),
        );
        let mut ids = vec![a, x, b];
        splice(&mut ids, x, &[c, a, d]);
        assert_eq!(ids, vec![a, c, d, b]);
    }

    #[tokio::test]
    async fn test_mutation_requires_event_source() {
        let ism = Arc::new(VersionItemStateManager::new(
            Arc::new(MemoryPersistenceManager::new()),
            Arc::new(BroadcastDispatcher::default()),
            StorageRoots::default(),
        ));
        let binding = Arc::new(EventSourceBinding::new("/jcr:system"));
        let graph = VersionGraphStore::open(ism.clone(), binding, &VersionManagerConfig::default())
            .await
            .unwrap();

        assert!(ism.has_item_state(graph.histories_id()).await.unwrap());
        assert!(ism.has_item_state(graph.activities_id()).await.unwrap());
        assert!(matches!(
            graph.create_activity("orphan").await,
            Err(VersionError::UnknownEventSource)
        ));
    }
}
