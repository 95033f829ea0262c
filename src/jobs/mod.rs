//! Scheduled jobs
//!
//! A [`ScheduledJob`] declares its positional arguments, runs against the
//! shared [`JobContext`] and describes its own state for the execution
//! history. The [`JobRunner`] records every execution; [`start_scheduler`]
//! registers one cron job per definition.

pub mod definitions;
pub mod report;
pub mod scan;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::{Database, ExecutionState};
use crate::services::catalog::CatalogError;
use crate::services::convert::ConversionError;
use crate::services::{AcquisitionPipeline, ScanError};

pub use definitions::{JobDefinition, JobKind, load_definitions, parse_definitions};
pub use report::ReportJob;
pub use scan::ScanJob;

/// One declared positional argument
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArgumentInfo {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub description: &'static str,
}

/// Job metadata shown by `--list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobMeta {
    pub class: String,
    pub notes: &'static str,
    pub arguments: Vec<ArgumentInfo>,
}

/// Shared state handed to every job run
pub struct JobContext {
    pub db: Database,
    pub pipeline: Arc<AcquisitionPipeline>,
    pub config: Arc<Config>,
}

fn pid() -> u32 {
    std::process::id()
}

/// Short error name for job descriptions
pub fn error_name(error: &anyhow::Error) -> &'static str {
    if let Some(e) = error.downcast_ref::<ScanError>() {
        return e.name();
    }
    if error.downcast_ref::<CatalogError>().is_some() {
        return "CatalogError";
    }
    if error.downcast_ref::<ConversionError>().is_some() {
        return "ConversionError";
    }
    if error.downcast_ref::<std::io::Error>().is_some() {
        return "IOError";
    }
    if let Some(e) = error.downcast_ref::<walkdir::Error>() {
        if e.io_error().is_some() {
            return "IOError";
        }
    }
    "Error"
}

#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn meta_info(&self) -> JobMeta;

    async fn run(&self, ctx: &JobContext, args: &[JsonValue]) -> Result<JsonValue>;

    fn scheduled_description(&self) -> String {
        format!("pid: {}", pid())
    }

    fn scheduled_error_description(&self, error: &anyhow::Error) -> String {
        format!("pid: {} | exception: {}", pid(), error_name(error))
    }

    fn running_description(&self) -> String {
        format!("pid: {}", pid())
    }

    fn failed_description(&self, error: &anyhow::Error) -> String {
        format!("pid: {} | exception: {}", pid(), error_name(error))
    }

    fn succeeded_description(&self, _result: &JsonValue) -> String {
        format!("pid: {}", pid())
    }
}

/// The job implementing a definition kind
pub fn job_for(kind: JobKind) -> Arc<dyn ScheduledJob> {
    match kind {
        JobKind::Scan => Arc::new(ScanJob) as Arc<dyn ScheduledJob>,
        JobKind::Report => Arc::new(ReportJob),
    }
}

/// Runs jobs and records their executions
#[derive(Clone)]
pub struct JobRunner {
    ctx: Arc<JobContext>,
}

impl JobRunner {
    pub fn new(ctx: Arc<JobContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &JobContext {
        &self.ctx
    }

    /// Run a job to completion. The execution ends up succeeded with the
    /// job's result or failed with the error name.
    pub async fn execute(
        &self,
        name: &str,
        job: &dyn ScheduledJob,
        args: &[JsonValue],
    ) -> Result<JsonValue> {
        let executions = self.ctx.db.executions();
        let id = executions
            .create(name, ExecutionState::Scheduled, &job.scheduled_description())
            .await?;
        executions
            .update_state(id, ExecutionState::Running, &job.running_description(), None)
            .await?;
        info!(job = %name, execution = %id, "Job started");

        match job.run(&self.ctx, args).await {
            Ok(result) => {
                let description = job.succeeded_description(&result);
                executions
                    .update_state(id, ExecutionState::Succeeded, &description, Some(&result))
                    .await?;
                info!(job = %name, execution = %id, description = %description, "Job succeeded");
                Ok(result)
            }
            Err(e) => {
                let description = job.failed_description(&e);
                executions
                    .update_state(id, ExecutionState::Failed, &description, None)
                    .await?;
                error!(job = %name, execution = %id, error = %e, "Job failed");
                Err(e)
            }
        }
    }

    /// Record a definition that could not be scheduled
    pub async fn record_schedule_error(
        &self,
        name: &str,
        job: &dyn ScheduledJob,
        error: &anyhow::Error,
    ) -> Result<()> {
        self.ctx
            .db
            .executions()
            .create(name, ExecutionState::ScheduledError, &job.scheduled_error_description(error))
            .await?;
        Ok(())
    }
}

/// Metadata of every job kind, keyed by kind name
pub fn list_jobs() -> BTreeMap<&'static str, JobMeta> {
    [JobKind::Scan, JobKind::Report]
        .into_iter()
        .map(|kind| (kind.as_str(), job_for(kind).meta_info()))
        .collect()
}

/// Initialize and start the job scheduler with one cron job per definition
pub async fn start_scheduler(
    runner: JobRunner,
    definitions: Vec<JobDefinition>,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    for definition in definitions {
        let job = job_for(definition.job);
        let name = definition.name.clone();
        let args = Arc::new(definition.arguments);
        let job_runner = runner.clone();
        let cron_job = job.clone();

        let scheduled = Job::new_async(definition.schedule.as_str(), move |_uuid, _l| {
            let runner = job_runner.clone();
            let job = cron_job.clone();
            let name = name.clone();
            let args = args.clone();
            Box::pin(async move {
                if let Err(e) = runner.execute(&name, job.as_ref(), &args).await {
                    error!(job = %name, error = %e, "Scheduled job error");
                }
            })
        });

        match scheduled {
            Ok(cron) => {
                scheduler.add(cron).await?;
                info!(job = %definition.name, schedule = %definition.schedule, "Scheduled job");
            }
            Err(e) => {
                let e = anyhow::Error::from(e);
                warn!(job = %definition.name, error = %e, "Failed to schedule job");
                runner
                    .record_schedule_error(&definition.name, job.as_ref(), &e)
                    .await?;
            }
        }
    }

    scheduler.start().await?;

    info!("Job scheduler started");
    Ok(scheduler)
}

// Positional argument helpers. Malformed arguments are value errors.

fn invalid(message: String) -> anyhow::Error {
    ScanError::InvalidValue(message).into()
}

fn arg<'a>(args: &'a [JsonValue], index: usize, name: &str) -> Result<&'a JsonValue> {
    args.get(index)
        .filter(|v| !v.is_null())
        .ok_or_else(|| invalid(format!("missing argument {} ({})", index, name)))
}

pub(crate) fn arg_str(args: &[JsonValue], index: usize, name: &str) -> Result<String> {
    match arg(args, index, name)? {
        JsonValue::String(s) => Ok(s.clone()),
        other => Err(invalid(format!("{} must be a string, got {}", name, other))),
    }
}

pub(crate) fn arg_u64(args: &[JsonValue], index: usize, name: &str) -> Result<u64> {
    let value = arg(args, index, name)?;
    let parsed = match value {
        JsonValue::Number(n) => n.as_u64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| invalid(format!("{} must be a non-negative integer, got {}", name, value)))
}

/// A list given as an array or a comma separated string
pub(crate) fn arg_list(args: &[JsonValue], index: usize, name: &str) -> Result<Vec<String>> {
    let value = arg(args, index, name)?;
    let items: Vec<String> = match value {
        JsonValue::Array(items) => items
            .iter()
            .map(|item| match item {
                JsonValue::String(s) => Ok(s.trim().to_string()),
                other => Err(invalid(format!("{} must contain strings, got {}", name, other))),
            })
            .collect::<Result<_>>()?,
        JsonValue::String(s) => s.split(',').map(|s| s.trim().to_string()).collect(),
        other => return Err(invalid(format!("{} must be a list, got {}", name, other))),
    };
    Ok(items.into_iter().filter(|s| !s.is_empty()).collect())
}

/// An optional string; null, missing and blank all mean absent
pub(crate) fn arg_optional_str(args: &[JsonValue], index: usize) -> Option<String> {
    args.get(index)
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_names() {
        let path: anyhow::Error = ScanError::InvalidPath("/nope".to_string()).into();
        assert_eq!(error_name(&path), "PathError");
        let value = invalid("bad".to_string());
        assert_eq!(error_name(&value), "ValueError");
        assert_eq!(error_name(&anyhow::anyhow!("boom")), "Error");
    }

    #[test]
    fn test_walk_errors_are_io_errors() {
        let dir = tempfile::tempdir().unwrap();
        let walk_error = walkdir::WalkDir::new(dir.path().join("missing"))
            .into_iter()
            .find_map(Result::err)
            .unwrap();
        let err = anyhow::Error::from(walk_error).context("Failed to walk library");
        assert_eq!(error_name(&err), "IOError");
    }

    #[test]
    fn test_argument_helpers() {
        let args = vec![
            json!("/media"),
            json!(2),
            json!("fra, eng,"),
            json!(["opensubtitles"]),
            JsonValue::Null,
            json!(" "),
        ];
        assert_eq!(arg_str(&args, 0, "path").unwrap(), "/media");
        assert_eq!(arg_u64(&args, 1, "age").unwrap(), 2);
        assert_eq!(arg_list(&args, 2, "languages").unwrap(), vec!["fra", "eng"]);
        assert_eq!(arg_list(&args, 3, "providers").unwrap(), vec!["opensubtitles"]);
        assert!(arg_str(&args, 4, "missing").is_err());
        assert_eq!(arg_optional_str(&args, 5), None);
        assert_eq!(arg_optional_str(&args, 42), None);

        let err = arg_u64(&args, 0, "age").unwrap_err();
        assert_eq!(error_name(&err), "ValueError");
    }

    #[test]
    fn test_list_jobs() {
        let jobs = list_jobs();
        assert_eq!(jobs["scan"].arguments.len(), 11);
        assert_eq!(jobs["report"].arguments.len(), 3);
    }
}
