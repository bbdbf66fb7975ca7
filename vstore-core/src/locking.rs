//! Item state locking
//!
//! One shared/exclusive lock guards the version storage. Readers that need a
//! consistent view (cache lookups, ancestry walks) hold a [`ReadLock`];
//! applying a change log holds the [`WriteLock`]. Both release on drop, so
//! every exit path (including `?`) gives the lock back.

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Locking domain of the item state manager
#[derive(Debug, Default)]
pub struct ItemStateLocking {
    lock: RwLock<()>,
}

/// Shared read lock, released when dropped
#[must_use = "the read lock is released as soon as the guard is dropped"]
pub struct ReadLock<'a> {
    _guard: RwLockReadGuard<'a, ()>,
}

/// Exclusive write lock, released when dropped
#[must_use = "the write lock is released as soon as the guard is dropped"]
pub struct WriteLock<'a> {
    _guard: RwLockWriteGuard<'a, ()>,
}

impl ItemStateLocking {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the shared read lock
    pub async fn acquire_read_lock(&self) -> ReadLock<'_> {
        let guard = self.lock.read().await;
        tracing::trace!("read lock acquired");
        ReadLock { _guard: guard }
    }

    /// Acquire the exclusive write lock
    pub async fn acquire_write_lock(&self) -> WriteLock<'_> {
        let guard = self.lock.write().await;
        tracing::trace!("write lock acquired");
        WriteLock { _guard: guard }
    }
}

impl ReadLock<'_> {
    /// Release the lock explicitly
    pub fn release(self) {}
}

impl WriteLock<'_> {
    /// Release the lock explicitly
    pub fn release(self) {}
}
