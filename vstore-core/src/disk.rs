//! Disk-persistent version storage backed by sled
//!
//! Layout inside the sled tree:
//! ```text
//! item/<uuid>   bincode ItemState
//! refs/<uuid>   bincode NodeReferences (target = <uuid>)
//! ```
//! A change log becomes one `sled::Batch`, which sled applies atomically.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::VersionManagerConfig;
use crate::error::{StorageError, StorageResult};
use crate::id::NodeId;
use crate::persistence::PersistenceManager;
use crate::state::{ChangeLog, ItemState, NodeReferences};

const ITEM_PREFIX: &str = "item/";
const REFS_PREFIX: &str = "refs/";

fn item_key(id: NodeId) -> String {
    format!("{}{}", ITEM_PREFIX, id)
}

fn refs_key(id: NodeId) -> String {
    format!("{}{}", REFS_PREFIX, id)
}

/// Sled-backed persistence manager
pub struct SledPersistenceManager {
    path: PathBuf,
    db: sled::Db,
    /// Flush to disk after every stored change log
    flush_on_store: bool,
    closed: AtomicBool,
}

impl SledPersistenceManager {
    /// Open or create a store at the given directory
    pub fn open(path: &Path, flush_on_store: bool) -> StorageResult<Self> {
        std::fs::create_dir_all(path)?;
        let db = sled::open(path.join("versions.db")).map_err(|e| {
            StorageError::Database(format!("Failed to open sled database at {:?}: {}", path, e))
        })?;

        tracing::info!("Opened version storage at {:?} ({} records)", path, db.len());

        Ok(Self {
            path: path.to_path_buf(),
            db,
            flush_on_store,
            closed: AtomicBool::new(false),
        })
    }

    /// Open the store configured by `config.storage_path`
    pub fn open_with_config(config: &VersionManagerConfig) -> StorageResult<Self> {
        let path = config.storage_path.as_deref().ok_or_else(|| {
            StorageError::Database("No storage path configured".to_string())
        })?;
        Self::open(path, config.flush_on_store)
    }

    /// Directory this store lives in
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceManager for SledPersistenceManager {
    async fn load(&self, id: NodeId) -> StorageResult<ItemState> {
        self.check_open()?;
        match self.db.get(item_key(id))? {
            Some(data) => Ok(ItemState::from_bytes(&data)?),
            None => Err(StorageError::NotFound(id)),
        }
    }

    async fn exists(&self, id: NodeId) -> StorageResult<bool> {
        self.check_open()?;
        Ok(self.db.contains_key(item_key(id))?)
    }

    async fn load_references(&self, target: NodeId) -> StorageResult<NodeReferences> {
        self.check_open()?;
        match self.db.get(refs_key(target))? {
            Some(data) => Ok(bincode::deserialize(&data)?),
            None => Ok(NodeReferences::new(target)),
        }
    }

    async fn exists_references(&self, target: NodeId) -> StorageResult<bool> {
        Ok(self.load_references(target).await?.has_references())
    }

    async fn store(&self, changes: &ChangeLog) -> StorageResult<()> {
        self.check_open()?;

        let mut batch = sled::Batch::default();
        for state in changes.added_states().iter().chain(changes.modified_states()) {
            batch.insert(item_key(state.id()).as_bytes(), state.to_bytes()?);
        }
        for state in changes.deleted_states() {
            batch.remove(item_key(state.id()).as_bytes());
        }
        for refs in changes.reference_updates() {
            let key = refs_key(refs.target);
            if refs.has_references() {
                batch.insert(key.as_bytes(), bincode::serialize(refs)?);
            } else {
                batch.remove(key.as_bytes());
            }
        }

        self.db.apply_batch(batch)?;

        if self.flush_on_store {
            self.db
                .flush()
                .map_err(|e| StorageError::Database(format!("sled flush failed: {}", e)))?;
        }

        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.db.flush()?;
        }
        Ok(())
    }
}
