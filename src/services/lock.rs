//! Reader/writer lock guarding the cache backing store
//!
//! Readers (cache lookups) share the lock; a writer (cache population)
//! excludes readers and other writers. Release happens when the returned
//! lease is dropped. There is no upgrade path from a read lease to a write
//! lease and the lock is not reentrant: acquiring a write lease while holding
//! a read lease on the same task deadlocks in blocking mode.

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shared-access capability. Dropping it releases the read side.
pub struct ReadLease<'a> {
    _guard: RwLockReadGuard<'a, ()>,
}

/// Exclusive-access capability. Dropping it releases the write side.
pub struct WriteLease<'a> {
    _guard: RwLockWriteGuard<'a, ()>,
}

/// Thread-safe reader/writer mutex used as the cache backend lock
#[derive(Debug, Default)]
pub struct CacheLock {
    inner: RwLock<()>,
}

impl CacheLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the read side.
    ///
    /// With `wait` the call blocks until the lease is granted and always
    /// returns `Some`. Without `wait` it returns `None` when a writer holds
    /// the lock.
    pub async fn acquire_read(&self, wait: bool) -> Option<ReadLease<'_>> {
        if wait {
            Some(ReadLease {
                _guard: self.inner.read().await,
            })
        } else {
            self.inner
                .try_read()
                .ok()
                .map(|guard| ReadLease { _guard: guard })
        }
    }

    /// Acquire the write side. Same `wait` semantics as [`acquire_read`](Self::acquire_read).
    pub async fn acquire_write(&self, wait: bool) -> Option<WriteLease<'_>> {
        if wait {
            Some(WriteLease {
                _guard: self.inner.write().await,
            })
        } else {
            self.inner
                .try_write()
                .ok()
                .map(|guard| WriteLease { _guard: guard })
        }
    }

    /// Release a read lease explicitly
    pub fn release_read(lease: ReadLease<'_>) {
        drop(lease);
    }

    /// Release a write lease explicitly
    pub fn release_write(lease: WriteLease<'_>) {
        drop(lease);
    }
}
