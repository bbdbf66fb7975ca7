//! Workspace view of a versionable node
//!
//! The workspace that owns a versionable node is outside of the version
//! storage. Checkin and checkout validation only need a few facts about the
//! node, which the workspace exposes through [`NodeRef`].

use crate::id::NodeId;
use crate::state::FrozenNode;

/// A versionable node as seen from its workspace
pub trait NodeRef: Send + Sync {
    /// Identity of the node
    fn node_id(&self) -> NodeId;

    /// `true` for full versioning (history id recorded on the node),
    /// `false` for simple versioning (history looked up by node identity)
    fn is_full_versionable(&self) -> bool;

    /// History recorded on the node (full versioning only)
    fn version_history_id(&self) -> Option<NodeId>;

    /// Version the node is currently based on
    fn base_version_id(&self) -> Option<NodeId>;

    /// Explicit predecessors for the next checkin (more than one after a merge).
    /// Empty means "the base version".
    fn predecessor_ids(&self) -> Vec<NodeId> {
        Vec::new()
    }

    /// Activity the node is checked out under
    fn activity_id(&self) -> Option<NodeId> {
        None
    }

    /// Snapshot of the node's current state
    fn frozen_node(&self) -> FrozenNode;

    /// Whether a node with this id exists in the node's workspace
    fn has_node(&self, id: NodeId) -> bool;
}
