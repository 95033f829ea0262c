//! Key/value store backing the metadata cache region
//!
//! Values are JSON text. Expiration is applied on read by comparing the
//! stored creation time; stale rows are overwritten by the next `put`.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;

/// Cache entry repository
pub struct CacheRepository {
    pool: SqlitePool,
}

impl CacheRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the raw value for `key` if it is younger than `max_age`
    pub async fn get(&self, key: &str, max_age: Duration) -> Result<Option<String>> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT value, created_at FROM cache_entries WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        let Some((value, created_str)) = row else {
            return Ok(None);
        };

        let created_at = DateTime::parse_from_rfc3339(&created_str)?.with_timezone(&Utc);
        let age = Utc::now().signed_duration_since(created_at);
        match age.to_std() {
            Ok(age) if age > max_age => Ok(None),
            _ => Ok(Some(value)),
        }
    }

    /// Insert or replace the value for `key`
    pub async fn put(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO cache_entries (key, value, created_at) VALUES (?1, ?2, ?3)")
            .bind(key)
            .bind(value)
            .bind(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drop entries older than `max_age`. Returns the number removed.
    pub async fn purge_expired(&self, max_age: Duration) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::from_std(max_age)?;
        let result = sqlx::query("DELETE FROM cache_entries WHERE created_at < ?1")
            .bind(cutoff.to_rfc3339_opts(SecondsFormat::Micros, true))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
