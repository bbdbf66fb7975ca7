//! Error types for the version storage

use crate::id::NodeId;

/// Result type for version manager operations
pub type Result<T> = std::result::Result<T, VersionError>;

/// Result type for persistence operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Errors surfaced by a persistence collaborator
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Item not found: {0}")]
    NotFound(NodeId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Persistence manager is closed")]
    Closed,
}

impl From<bincode::Error> for StorageError {
    fn from(e: bincode::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

impl From<sled::Error> for StorageError {
    fn from(e: sled::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

/// Reason a checkout was rejected because of its activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityViolation {
    /// The activity is referenced by a node that does not exist in the
    /// current workspace, so another workspace holds the checkout.
    ForeignWorkspace { activity: NodeId, node: NodeId },
    /// The activity's latest version in this history is not an ancestor of
    /// the node's base version.
    DivergentBranch { activity: NodeId, version: String },
}

impl std::fmt::Display for ActivityViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityViolation::ForeignWorkspace { activity, node } => write!(
                f,
                "Activity {} is already used for node {} in another workspace",
                activity, node
            ),
            ActivityViolation::DivergentBranch { activity, version } => write!(
                f,
                "Activity {} is used by another version on a different branch: {}",
                activity, version
            ),
        }
    }
}

/// Errors returned by version manager operations
#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    #[error("Version history already exists for node {0}")]
    AlreadyExists(NodeId),

    #[error("Item not found: {0}")]
    NotFound(NodeId),

    #[error("Version {name} does not exist in version history {history}")]
    VersionNotFound { history: NodeId, name: String },

    #[error("Unable to checkout: {0}")]
    ActivityViolation(ActivityViolation),

    #[error("Version label {label} already defined for version {version}")]
    LabelConflict { label: String, version: String },

    #[error("Version label {label} does not exist in version history {history}")]
    LabelNotFound { history: NodeId, label: String },

    #[error("Root version of history {0} cannot be removed")]
    RootVersionRemoval(NodeId),

    #[error("Item {0} is still referenced")]
    ReferentialIntegrity(NodeId),

    #[error("Version {version} does not belong to version history {history}")]
    ForeignVersion { history: NodeId, version: NodeId },

    #[error("Node {0} is not versionable")]
    NotVersionable(NodeId),

    #[error("Item {id} is not a {expected}")]
    ItemType { id: NodeId, expected: &'static str },

    #[error("Unknown event source")]
    UnknownEventSource,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<ActivityViolation> for VersionError {
    fn from(v: ActivityViolation) -> Self {
        VersionError::ActivityViolation(v)
    }
}

impl VersionError {
    /// Map a storage-level miss onto the domain `NotFound` kind
    pub(crate) fn from_storage(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(id) => VersionError::NotFound(id),
            other => VersionError::Storage(other),
        }
    }
}
