//! Stable identifiers for items in the version storage
//!
//! Every history, version, activity and storage root is addressed by a
//! [`NodeId`]. References from workspace nodes into the version storage are
//! addressed by the [`PropertyId`] that holds them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a node in the version storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(Uuid);

/// Parent of the version storage (`/jcr:system`)
pub const SYSTEM_NODE_ID: NodeId = NodeId(Uuid::from_u128(0xdeadbeef_cafe_babe_cafe_babecafebabe));

/// Root of all version histories (`/jcr:system/jcr:versionStorage`)
pub const HISTORIES_NODE_ID: NodeId =
    NodeId(Uuid::from_u128(0xdeadbeef_face_babe_cafe_babecafebabe));

/// Root of all activities (`/jcr:system/jcr:activities`)
pub const ACTIVITIES_NODE_ID: NodeId =
    NodeId(Uuid::from_u128(0xdeadbeef_face_babe_ac71_babecafebabe));

impl NodeId {
    /// Create a fresh random identifier
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse from the hyphenated string form
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl std::str::FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Identifier of a property, used as the source of a node reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyId {
    /// Node that owns the property
    pub parent: NodeId,
    /// Property name (e.g. `jcr:activity`)
    pub name: String,
}

impl PropertyId {
    pub fn new(parent: NodeId, name: impl Into<String>) -> Self {
        Self {
            parent,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for PropertyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.parent, self.name)
    }
}
