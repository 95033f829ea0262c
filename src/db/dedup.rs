//! Append-only log of subtitles already written to disk
//!
//! One row per (content hash, destination path). Rows are never updated or
//! deleted.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

/// A persisted (hash, path) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupRecord {
    pub hash: String,
    pub path: String,
    pub created_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for DedupRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let created_str: String = row.try_get("created_at")?;
        let created_at = DateTime::parse_from_rfc3339(&created_str)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| sqlx::Error::Decode(e.into()))?;

        Ok(Self {
            hash: row.try_get("hash")?,
            path: row.try_get("path")?,
            created_at,
        })
    }
}

/// Dedup log repository
pub struct DedupRepository {
    pool: SqlitePool,
}

impl DedupRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Look up the record for a (hash, path) pair
    pub async fn find(&self, hash: &str, path: &str) -> Result<Option<DedupRecord>> {
        let record = sqlx::query_as::<_, DedupRecord>(
            "SELECT hash, path, created_at FROM subtitle_dedup WHERE hash = ?1 AND path = ?2",
        )
        .bind(hash)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Append a record. Returns `false` when the pair was already present.
    pub async fn insert(&self, hash: &str, path: &str) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO subtitle_dedup (hash, path, created_at) VALUES (?1, ?2, ?3)",
        )
        .bind(hash)
        .bind(path)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Number of records in the log
    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subtitle_dedup")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
