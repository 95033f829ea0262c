//! Library survey job: lists the videos a scan would collect or ignore

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value as JsonValue;

use super::scan::{WEEK, parse_languages};
use super::{ArgumentInfo, JobContext, JobMeta, ScheduledJob, arg_list, arg_str, arg_u64};
use crate::services::SurveyRequest;

#[derive(Debug, Default, Clone, Copy)]
pub struct ReportJob;

impl ReportJob {
    pub fn parse_request(args: &[JsonValue]) -> Result<SurveyRequest> {
        let scan_path = PathBuf::from(arg_str(args, 0, "scan_path")?);
        let age_weeks = arg_u64(args, 1, "scan_age")?;
        let languages = parse_languages(&arg_list(args, 2, "languages")?)?;

        Ok(SurveyRequest {
            scan_path,
            age: WEEK * u32::try_from(age_weeks).unwrap_or(u32::MAX),
            languages,
        })
    }
}

#[async_trait]
impl ScheduledJob for ReportJob {
    fn meta_info(&self) -> JobMeta {
        JobMeta {
            class: format!("{}::ReportJob", module_path!()),
            notes: "Report the videos of a directory that are missing subtitles",
            arguments: vec![
                ArgumentInfo { kind: "string", description: "Directory to scan" },
                ArgumentInfo { kind: "integer", description: "Minimum video age in weeks" },
                ArgumentInfo { kind: "list", description: "Subtitle languages (ISO 639 codes)" },
            ],
        }
    }

    async fn run(&self, ctx: &JobContext, args: &[JsonValue]) -> Result<JsonValue> {
        let request = Self::parse_request(args)?;
        let report = ctx.pipeline.survey(&request).await?;
        Ok(serde_json::to_value(&report)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_request() {
        let request = ReportJob::parse_request(&[json!("/media"), json!("3"), json!("fre,eng")]).unwrap();
        assert_eq!(request.age, WEEK * 3);
        assert_eq!(request.languages.len(), 2);
    }

    #[test]
    fn test_missing_arguments() {
        assert!(ReportJob::parse_request(&[json!("/media")]).is_err());
    }
}
