//! Job execution history
//!
//! Each scheduled run gets a row that moves through
//! scheduled -> running -> succeeded | failed, carrying the job's status
//! description and, on success, its JSON result.

use anyhow::{Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value as JsonValue;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Execution lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Scheduled,
    ScheduledError,
    Running,
    Succeeded,
    Failed,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Scheduled => "scheduled",
            ExecutionState::ScheduledError => "scheduled_error",
            ExecutionState::Running => "running",
            ExecutionState::Succeeded => "succeeded",
            ExecutionState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(ExecutionState::Scheduled),
            "scheduled_error" => Some(ExecutionState::ScheduledError),
            "running" => Some(ExecutionState::Running),
            "succeeded" => Some(ExecutionState::Succeeded),
            "failed" => Some(ExecutionState::Failed),
            _ => None,
        }
    }
}

/// Execution record from database
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub job_name: String,
    pub state: ExecutionState,
    pub description: Option<String>,
    pub result: Option<JsonValue>,
    pub scheduled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for ExecutionRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let decode = |e: Box<dyn std::error::Error + Send + Sync>| sqlx::Error::Decode(e);
        let id_str: String = row.try_get("id")?;
        let state_str: String = row.try_get("state")?;
        let result_str: Option<String> = row.try_get("result")?;
        let scheduled_str: String = row.try_get("scheduled_at")?;
        let updated_str: String = row.try_get("updated_at")?;

        Ok(Self {
            id: Uuid::parse_str(&id_str).map_err(|e| decode(e.into()))?,
            job_name: row.try_get("job_name")?,
            state: ExecutionState::parse(&state_str)
                .ok_or_else(|| decode(format!("unknown execution state '{}'", state_str).into()))?,
            description: row.try_get("description")?,
            result: result_str
                .map(|s| serde_json::from_str(&s))
                .transpose()
                .map_err(|e| decode(e.into()))?,
            scheduled_at: parse_timestamp(&scheduled_str).map_err(|e| decode(e.into()))?,
            updated_at: parse_timestamp(&updated_str).map_err(|e| decode(e.into()))?,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Execution history repository
pub struct ExecutionRepository {
    pool: SqlitePool,
}

impl ExecutionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new execution in the given initial state
    pub async fn create(
        &self,
        job_name: &str,
        state: ExecutionState,
        description: &str,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let timestamp = now();
        sqlx::query(
            r#"INSERT INTO job_executions (id, job_name, state, description, scheduled_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?5)"#,
        )
        .bind(id.to_string())
        .bind(job_name)
        .bind(state.as_str())
        .bind(description)
        .bind(timestamp)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// Move an execution to a new state, optionally storing the job result
    pub async fn update_state(
        &self,
        id: Uuid,
        state: ExecutionState,
        description: &str,
        result: Option<&JsonValue>,
    ) -> Result<()> {
        let result_str = result.map(serde_json::to_string).transpose()?;
        let updated = sqlx::query(
            r#"UPDATE job_executions
               SET state = ?2, description = ?3, result = COALESCE(?4, result), updated_at = ?5
               WHERE id = ?1"#,
        )
        .bind(id.to_string())
        .bind(state.as_str())
        .bind(description)
        .bind(result_str)
        .bind(now())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(anyhow!("Execution {} not found", id));
        }
        Ok(())
    }

    /// Get an execution by id
    pub async fn get(&self, id: Uuid) -> Result<Option<ExecutionRecord>> {
        let record = sqlx::query_as::<_, ExecutionRecord>("SELECT * FROM job_executions WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// Most recent executions of a job, newest first
    pub async fn list_for_job(&self, job_name: &str, limit: i64) -> Result<Vec<ExecutionRecord>> {
        let records = sqlx::query_as::<_, ExecutionRecord>(
            "SELECT * FROM job_executions WHERE job_name = ?1 ORDER BY scheduled_at DESC LIMIT ?2",
        )
        .bind(job_name)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn test_execution_lifecycle() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = db.executions();

        let id = repo
            .create("tv-subtitles", ExecutionState::Scheduled, "pid: 1")
            .await
            .unwrap();
        repo.update_state(id, ExecutionState::Running, "pid: 1", None)
            .await
            .unwrap();
        let result = serde_json::json!({"subtitles": {"total": 2}});
        repo.update_state(id, ExecutionState::Succeeded, "pid: 1 | downloaded: 2", Some(&result))
            .await
            .unwrap();

        let record = repo.get(id).await.unwrap().unwrap();
        assert_eq!(record.state, ExecutionState::Succeeded);
        assert_eq!(record.description.as_deref(), Some("pid: 1 | downloaded: 2"));
        assert_eq!(record.result, Some(result));

        let listed = repo.list_for_job("tv-subtitles", 10).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_update_unknown_execution_fails() {
        let db = Database::connect_in_memory().await.unwrap();
        let err = db
            .executions()
            .update_state(Uuid::new_v4(), ExecutionState::Running, "pid: 1", None)
            .await;
        assert!(err.is_err());
    }
}
