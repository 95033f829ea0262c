//! Subtitle acquisition job

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::info;

use super::{
    ArgumentInfo, JobContext, JobMeta, ScheduledJob, arg_list, arg_optional_str, arg_str,
    arg_u64, invalid, pid,
};
use crate::services::catalog::{MediaCatalog, PlexCatalog};
use crate::services::providers::ProviderConfigs;
use crate::services::{Language, ScanRequest, SubtitleFormat};

pub(crate) const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Parse a language list argument into a set
pub(crate) fn parse_languages(codes: &[String]) -> Result<BTreeSet<Language>> {
    codes
        .iter()
        .map(|code| Language::from_code(code).map_err(|e| invalid(e.to_string())))
        .collect()
}

fn parse_provider_configs(value: Option<&JsonValue>) -> Result<ProviderConfigs> {
    let value = match value {
        None | Some(JsonValue::Null) => return Ok(ProviderConfigs::new()),
        Some(JsonValue::String(s)) if s.trim().is_empty() => return Ok(ProviderConfigs::new()),
        Some(JsonValue::String(s)) => serde_json::from_str(s)
            .map_err(|e| invalid(format!("provider_configs is not valid JSON: {}", e)))?,
        Some(other) => other.clone(),
    };
    serde_json::from_value::<ProviderConfigs>(value)
        .map_err(|e| invalid(format!("invalid provider_configs: {}", e)))
}

/// Scan a library and download missing subtitles
#[derive(Debug, Default, Clone, Copy)]
pub struct ScanJob;

impl ScanJob {
    pub fn parse_request(args: &[JsonValue]) -> Result<(ScanRequest, Option<(String, String)>)> {
        let scan_path = PathBuf::from(arg_str(args, 0, "scan_path")?);
        let age_weeks = arg_u64(args, 1, "scan_age")?;
        let languages = parse_languages(&arg_list(args, 2, "languages")?)?;
        let encoding = arg_str(args, 3, "encoding")?;
        let min_score = u32::try_from(arg_u64(args, 4, "min_score")?)
            .map_err(|_| invalid("min_score is out of range".to_string()))?;
        let providers = arg_list(args, 5, "providers")?;
        let provider_configs = parse_provider_configs(args.get(6))?;
        let max_workers = usize::try_from(arg_u64(args, 7, "max_workers")?)
            .map_err(|_| invalid("max_workers is out of range".to_string()))?;
        let catalog = arg_optional_str(args, 8).zip(arg_optional_str(args, 9));
        let convert_to = arg_optional_str(args, 10)
            .map(|format| format.parse::<SubtitleFormat>())
            .transpose()
            .map_err(|e| invalid(e.to_string()))?;

        let request = ScanRequest {
            scan_path,
            age: WEEK * u32::try_from(age_weeks).unwrap_or(u32::MAX),
            languages,
            encoding,
            min_score,
            providers,
            provider_configs,
            max_workers,
            convert_to,
        };
        Ok((request, catalog))
    }
}

#[async_trait]
impl ScheduledJob for ScanJob {
    fn meta_info(&self) -> JobMeta {
        JobMeta {
            class: format!("{}::ScanJob", module_path!()),
            notes: "Download missing subtitles for the videos of a directory",
            arguments: vec![
                ArgumentInfo { kind: "string", description: "Directory to scan" },
                ArgumentInfo { kind: "integer", description: "Minimum video age in weeks" },
                ArgumentInfo { kind: "list", description: "Subtitle languages (ISO 639 codes)" },
                ArgumentInfo { kind: "string", description: "Encoding of saved subtitles" },
                ArgumentInfo { kind: "integer", description: "Minimum score in percent of the best score" },
                ArgumentInfo { kind: "list", description: "Subtitle providers" },
                ArgumentInfo { kind: "dict", description: "Provider credentials keyed by provider name" },
                ArgumentInfo { kind: "integer", description: "Maximum concurrent provider queries" },
                ArgumentInfo { kind: "string", description: "Plex server URL (optional)" },
                ArgumentInfo { kind: "string", description: "Plex token (optional)" },
                ArgumentInfo { kind: "string", description: "Convert saved subtitles to srt, vtt or ass (optional)" },
            ],
        }
    }

    async fn run(&self, ctx: &JobContext, args: &[JsonValue]) -> Result<JsonValue> {
        let (request, catalog) = Self::parse_request(args)?;

        let catalog = match catalog {
            Some((url, token)) => {
                info!(url = %url, "Catalog refresh enabled");
                Some(Arc::new(PlexCatalog::new(&url, &token, &ctx.config.user_agent)?)
                    as Arc<dyn MediaCatalog>)
            }
            None => None,
        };

        let report = ctx.pipeline.run(&request, catalog).await?;
        Ok(serde_json::to_value(&report)?)
    }

    fn succeeded_description(&self, result: &JsonValue) -> String {
        let downloaded = result
            .pointer("/subtitles/total")
            .and_then(JsonValue::as_u64)
            .unwrap_or(0);
        format!("pid: {} | downloaded: {}", pid(), downloaded)
    }
}
