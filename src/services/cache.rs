//! Process-wide cache region for metadata lookups
//!
//! Created once in `main` and shared by reference; nothing in the job code
//! configures or replaces it. Every access to the backing store goes through
//! the [`CacheLock`]: lookups take the read side, population takes the write
//! side.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::lock::CacheLock;
use crate::db::Database;

/// Cached values backed by the database key/value table
pub struct CacheRegion {
    db: Database,
    expiration: Duration,
    lock: CacheLock,
}

impl CacheRegion {
    pub fn new(db: Database, expiration: Duration) -> Self {
        Self {
            db,
            expiration,
            lock: CacheLock::new(),
        }
    }

    /// Get a cached value. Entries that no longer deserialize are treated as missing.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw = {
            let _read = self.lock.acquire_read(true).await;
            self.db.cache().get(key, self.expiration).await?
        };

        Ok(raw.and_then(|raw| match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                None
            }
        }))
    }

    /// Store a value, replacing any previous entry
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        let _write = self.lock.acquire_write(true).await;
        self.db.cache().put(key, &raw).await
    }

    /// Return the cached value for `key`, or compute, store and return it.
    ///
    /// The creator runs without holding the lock, so concurrent misses on the
    /// same key may both compute; the last write wins.
    pub async fn get_or_create<T, F, Fut>(&self, key: &str, creator: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.get(key).await? {
            debug!(key = %key, "Cache hit");
            return Ok(value);
        }

        debug!(key = %key, "Cache miss");
        let value = creator().await?;
        self.set(key, &value).await?;
        Ok(value)
    }

    /// Remove expired entries from the backing store
    pub async fn purge_expired(&self) -> Result<u64> {
        let _write = self.lock.acquire_write(true).await;
        self.db.cache().purge_expired(self.expiration).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_get_or_create_computes_once() {
        let db = Database::connect_in_memory().await.unwrap();
        let region = CacheRegion::new(db, Duration::from_secs(3600));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: Option<u32> = region
                .get_or_create("tvmaze:singlesearch:lost", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(123))
                })
                .await
                .unwrap();
            assert_eq!(value, Some(123));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_creator_errors_are_not_cached() {
        let db = Database::connect_in_memory().await.unwrap();
        let region = CacheRegion::new(db, Duration::from_secs(3600));

        let failed: Result<u32> = region
            .get_or_create("key", || async { Err(anyhow::anyhow!("lookup failed")) })
            .await;
        assert!(failed.is_err());
        assert_eq!(region.get::<u32>("key").await.unwrap(), None);
    }
}
