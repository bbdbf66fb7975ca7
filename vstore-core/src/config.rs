//! Version manager configuration
//!
//! Stored as JSON (`version-manager.json`) next to the repository data.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{StorageError, StorageResult};
use crate::id::{NodeId, ACTIVITIES_NODE_ID, HISTORIES_NODE_ID, SYSTEM_NODE_ID};
use crate::state::StorageRoots;

/// Name of the config file inside a repository directory
pub const CONFIG_FILE_NAME: &str = "version-manager.json";

/// Configuration of a version manager instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionManagerConfig {
    /// Parent of the version storage
    #[serde(default = "default_system_id")]
    pub system_id: NodeId,
    /// Root of the version histories
    #[serde(default = "default_histories_id")]
    pub histories_id: NodeId,
    /// Root of the activities
    #[serde(default = "default_activities_id")]
    pub activities_id: NodeId,
    /// Path that emitted notifications are rooted at
    #[serde(default = "default_system_path")]
    pub system_path: String,
    /// Directory of the durable store (none for in-memory use)
    #[serde(default)]
    pub storage_path: Option<PathBuf>,
    /// Flush the durable store after every change log
    #[serde(default = "default_flush_on_store")]
    pub flush_on_store: bool,
}

fn default_system_id() -> NodeId {
    SYSTEM_NODE_ID
}

fn default_histories_id() -> NodeId {
    HISTORIES_NODE_ID
}

fn default_activities_id() -> NodeId {
    ACTIVITIES_NODE_ID
}

fn default_system_path() -> String {
    "/jcr:system".to_string()
}

fn default_flush_on_store() -> bool {
    true
}

impl Default for VersionManagerConfig {
    fn default() -> Self {
        Self {
            system_id: default_system_id(),
            histories_id: default_histories_id(),
            activities_id: default_activities_id(),
            system_path: default_system_path(),
            storage_path: None,
            flush_on_store: default_flush_on_store(),
        }
    }
}

impl VersionManagerConfig {
    /// Configured histories and activities roots
    pub fn storage_roots(&self) -> StorageRoots {
        StorageRoots {
            histories: self.histories_id,
            activities: self.activities_id,
        }
    }

    /// Load the config from a repository directory, falling back to defaults
    pub fn load(repo_path: &Path) -> StorageResult<Self> {
        let config_path = repo_path.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&config_path)?;
        serde_json::from_str(&data).map_err(|e| {
            StorageError::Serialization(format!(
                "Failed to parse {:?}: {}",
                config_path, e
            ))
        })
    }

    /// Save the config into a repository directory
    pub fn save(&self, repo_path: &Path) -> StorageResult<()> {
        fs::create_dir_all(repo_path)?;
        let config_path = repo_path.join(CONFIG_FILE_NAME);
        let tmp_path = config_path.with_extension("tmp");
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, &config_path)?;
        Ok(())
    }
}
