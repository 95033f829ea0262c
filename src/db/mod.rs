//! Database connection and repositories
//!
//! A single SQLite file holds the append-only dedup log, the metadata cache
//! and the job execution history.

pub mod cache;
pub mod dedup;
pub mod executions;

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::debug;

pub use cache::CacheRepository;
pub use dedup::{DedupRecord, DedupRepository};
pub use executions::{ExecutionRecord, ExecutionRepository, ExecutionState};

/// Tables are created idempotently on every connect.
const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS subtitle_dedup (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        hash TEXT NOT NULL,
        path TEXT NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE(hash, path)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS cache_entries (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        created_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS job_executions (
        id TEXT PRIMARY KEY,
        job_name TEXT NOT NULL,
        state TEXT NOT NULL,
        description TEXT,
        result TEXT,
        scheduled_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_job_executions_job ON job_executions(job_name, scheduled_at)",
];

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database wrapper from an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the SQLite file at `path` and ensure the schema
    pub async fn connect(path: &str, max_connections: u32) -> Result<Self> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            if let Some(parent) = std::path::Path::new(path).parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
            }
            format!("sqlite://{}", path)
        };

        let options = SqliteConnectOptions::from_str(&url)
            .with_context(|| format!("Invalid database path '{}'", path))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .context("Failed to open SQLite database")?;

        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// Private in-memory database, used by tests and dry runs.
    /// Pinned to one connection: every SQLite memory connection is its own database.
    pub async fn connect_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory SQLite database")?;

        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Database schema ready");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close all pooled connections
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Get the dedup log repository
    pub fn dedup(&self) -> DedupRepository {
        DedupRepository::new(self.pool.clone())
    }

    /// Get the key/value cache repository
    pub fn cache(&self) -> CacheRepository {
        CacheRepository::new(self.pool.clone())
    }

    /// Get the job execution repository
    pub fn executions(&self) -> ExecutionRepository {
        ExecutionRepository::new(self.pool.clone())
    }
}
