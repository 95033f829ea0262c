//! Subtitle acquisition pipeline
//!
//! One run validates its request, discovers videos under the scan path,
//! classifies and refines them, queries providers for the missing languages,
//! filters duplicates, saves what is left and optionally refreshes a media
//! catalog and converts the saved files. The outcome is a [`RunReport`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::catalog::{MediaCatalog, find_video};
use super::convert::{SubtitleConverter, SubtitleFormat};
use super::dedup::DuplicateFilter;
use super::language::Language;
use super::providers::{ProviderConfigs, ProviderPool, ProviderRegistry, SubtitleCandidate};
use super::refiner::Refiner;
use super::report::RunReport;
use super::scanner::{check_video, missing_languages, scan_videos, search_external_subtitles};
use super::score::min_score;
use super::storage::{SavedSubtitle, lookup_encoding, save_subtitles};
use super::video::Video;
use crate::db::Database;

/// Request validation failures. Nothing has been read or written when one is
/// returned.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid scan path: {0}")]
    InvalidPath(String),
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

impl ScanError {
    /// Short name used in job descriptions
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidPath(_) => "PathError",
            Self::InvalidValue(_) => "ValueError",
        }
    }
}

/// Everything one acquisition run needs
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub scan_path: PathBuf,
    /// Minimum video age
    pub age: Duration,
    pub languages: BTreeSet<Language>,
    /// Text encoding label for saved subtitles
    pub encoding: String,
    /// Minimum score as a percentage of the hash score
    pub min_score: u32,
    pub providers: Vec<String>,
    pub provider_configs: ProviderConfigs,
    pub max_workers: usize,
    pub convert_to: Option<SubtitleFormat>,
}

/// The subset of a request a survey needs
#[derive(Debug, Clone)]
pub struct SurveyRequest {
    pub scan_path: PathBuf,
    pub age: Duration,
    pub languages: BTreeSet<Language>,
}

impl From<&ScanRequest> for SurveyRequest {
    fn from(request: &ScanRequest) -> Self {
        Self {
            scan_path: request.scan_path.clone(),
            age: request.age,
            languages: request.languages.clone(),
        }
    }
}

/// Videos split by classification
struct Classified {
    collected: Vec<Video>,
    ignored: Vec<Video>,
}

pub struct AcquisitionPipeline {
    db: Database,
    refiner: Arc<dyn Refiner>,
    registry: Arc<ProviderRegistry>,
    converter: Arc<dyn SubtitleConverter>,
    clock: fn() -> SystemTime,
}

impl AcquisitionPipeline {
    pub fn new(
        db: Database,
        refiner: Arc<dyn Refiner>,
        registry: Arc<ProviderRegistry>,
        converter: Arc<dyn SubtitleConverter>,
    ) -> Self {
        Self {
            db,
            refiner,
            registry,
            converter,
            clock: SystemTime::now,
        }
    }

    /// Replace the wall clock used for video ages and report timestamps
    pub fn with_clock(mut self, clock: fn() -> SystemTime) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> SystemTime {
        (self.clock)()
    }

    fn validate_survey(request: &SurveyRequest) -> Result<(), ScanError> {
        if !request.scan_path.is_dir() {
            return Err(ScanError::InvalidPath(format!(
                "{} is not a directory",
                request.scan_path.display()
            )));
        }
        if request.age.is_zero() {
            return Err(ScanError::InvalidValue("age must be at least 1".to_string()));
        }
        if request.languages.is_empty() {
            return Err(ScanError::InvalidValue("at least one language is required".to_string()));
        }
        Ok(())
    }

    fn validate(&self, request: &ScanRequest) -> Result<&'static encoding_rs::Encoding, ScanError> {
        Self::validate_survey(&request.into())?;

        if request.providers.is_empty() {
            return Err(ScanError::InvalidValue("at least one provider is required".to_string()));
        }
        if let Some(unknown) = request.providers.iter().find(|p| !self.registry.contains(p)) {
            return Err(ScanError::InvalidValue(format!(
                "unknown provider '{}', expected one of {}",
                unknown,
                self.registry.names().join(", ")
            )));
        }
        if request.max_workers < 1 {
            return Err(ScanError::InvalidValue("max_workers must be at least 1".to_string()));
        }
        lookup_encoding(&request.encoding)
            .ok_or_else(|| ScanError::InvalidValue(format!("unknown encoding '{}'", request.encoding)))
    }

    /// Videos old enough to process, with their external subtitles merged in
    async fn discover(&self, root: &Path, min_age: Duration) -> Result<Vec<Video>> {
        let root = root.to_path_buf();
        let now = self.now();

        tokio::task::spawn_blocking(move || -> Result<Vec<Video>> {
            let mut videos = scan_videos(&root, min_age, now)?;
            for video in &mut videos {
                let external = search_external_subtitles(&video.path)?;
                video.subtitle_languages.extend(external.into_values());
            }
            Ok(videos)
        })
        .await
        .context("Video discovery task panicked")?
    }

    fn classify(videos: Vec<Video>, languages: &BTreeSet<Language>, min_age: Duration) -> Classified {
        let (collected, ignored) = videos
            .into_iter()
            .partition(|video| check_video(video, languages, min_age, false));
        Classified { collected, ignored }
    }

    fn timestamp(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.now())
    }

    /// Discover and classify without downloading anything
    pub async fn survey(&self, request: &SurveyRequest) -> Result<RunReport> {
        Self::validate_survey(request)?;
        let mut report = RunReport::new(self.timestamp());

        let videos = self.discover(&request.scan_path, request.age).await?;
        let classified = Self::classify(videos, &request.languages, request.age);
        for video in &classified.collected {
            report.collect(video.name());
        }
        for video in &classified.ignored {
            report.ignore(video.name());
        }

        report.finish(self.timestamp());
        info!(
            collected = report.collected().len(),
            ignored = report.ignored().len(),
            "Survey complete"
        );
        Ok(report)
    }

    /// Run the full acquisition
    pub async fn run(
        &self,
        request: &ScanRequest,
        catalog: Option<Arc<dyn MediaCatalog>>,
    ) -> Result<RunReport> {
        let encoding = self.validate(request)?;
        let mut report = RunReport::new(self.timestamp());

        info!(
            path = %request.scan_path.display(),
            languages = ?request.languages.iter().map(Language::alpha3).collect::<Vec<_>>(),
            providers = ?request.providers,
            "Starting subtitle acquisition"
        );

        let videos = self.discover(&request.scan_path, request.age).await?;
        let Classified { mut collected, ignored } = Self::classify(videos, &request.languages, request.age);
        for video in &ignored {
            report.ignore(video.name());
        }

        for video in &mut collected {
            self.refiner
                .refine(video)
                .await
                .with_context(|| format!("Failed to refine {}", video.name()))?;
        }
        for video in &collected {
            report.collect(video.name());
        }

        if collected.is_empty() {
            info!("No video needs subtitles");
            report.finish(self.timestamp());
            return Ok(report);
        }
        report.subtitles_mut();

        let providers = self
            .registry
            .build(&request.providers, &request.provider_configs)?;
        let pool = ProviderPool::new(providers, request.max_workers);
        let downloads = self
            .download(&pool, &collected, &request.languages, request.min_score, request.max_workers)
            .await;
        report.discard_providers(pool.discarded_providers());

        let filter = DuplicateFilter::new(&self.db);
        let mut saved_by_video: Vec<(&Video, Vec<SavedSubtitle>)> = Vec::new();
        for (video, subtitles) in collected.iter().zip(downloads) {
            if subtitles.is_empty() {
                continue;
            }

            let outcome = filter
                .check(
                    subtitles,
                    |s| s.content.as_deref().unwrap_or_default(),
                    |s| video.subtitle_path(&s.language),
                )
                .await?;
            for discarded in &outcome.discarded {
                report
                    .subtitles_mut()
                    .discarded
                    .push(video.subtitle_path(&discarded.language).to_string_lossy().to_string());
            }

            let saved = save_subtitles(video, &outcome.keep, encoding).await?;
            for subtitle in &saved {
                let path = subtitle.path.to_string_lossy();
                if let Some(key) = outcome.keys.iter().find(|key| key.path == path) {
                    filter.record(key).await?;
                }
                report.record_saved(&video.name(), &subtitle.provider);
            }
            if !saved.is_empty() {
                saved_by_video.push((video, saved));
            }
        }

        if let Some(catalog) = catalog {
            for (video, _) in &saved_by_video {
                self.refresh_catalog(catalog.as_ref(), video, &mut report).await?;
            }
        }

        // Converted files keep their .srt name so later scans still count them.
        // Media servers that sniff by extension will see the wrong format.
        if let Some(target) = request.convert_to {
            for (_, saved) in &saved_by_video {
                for subtitle in saved {
                    let converted = self
                        .converter
                        .convert_file(&subtitle.path, target)
                        .await?;
                    if let Some(conversion) = converted {
                        let name = subtitle
                            .path
                            .file_name()
                            .map(|n| n.to_string_lossy().to_string())
                            .unwrap_or_default();
                        report
                            .subtitles_mut()
                            .converted
                            .push(format!("{}: {} -> {}", name, conversion.from, conversion.to));
                    }
                }
            }
        }

        report.finish(self.timestamp());
        info!(
            collected = report.collected().len(),
            ignored = report.ignored().len(),
            downloaded = report.total_subtitles(),
            duration = %report.meta.duration,
            "Subtitle acquisition complete"
        );
        Ok(report)
    }

    /// Best subtitles per video, in video order. Videos are processed
    /// `max_workers` at a time.
    async fn download(
        &self,
        pool: &ProviderPool,
        videos: &[Video],
        languages: &BTreeSet<Language>,
        min_score_pct: u32,
        max_workers: usize,
    ) -> Vec<Vec<SubtitleCandidate>> {
        let tasks: Vec<BoxFuture<'_, Vec<SubtitleCandidate>>> = videos
            .iter()
            .map(|video| {
                async move {
                    let missing = missing_languages(video, languages);
                    let threshold = min_score(video.kind, min_score_pct);
                    let candidates = pool.list_subtitles(video, &missing).await;
                    debug!(video = %video.name(), candidates = candidates.len(), min_score = threshold, "Listed candidates");
                    pool.download_best_subtitles(candidates, video, &missing, threshold)
                        .await
                }
                .boxed()
            })
            .collect();

        futures::stream::iter(tasks)
            .buffered(max_workers.max(1))
            .collect()
            .await
    }

    async fn refresh_catalog(
        &self,
        catalog: &dyn MediaCatalog,
        video: &Video,
        report: &mut RunReport,
    ) -> Result<()> {
        let label = video.label();
        let item = match find_video(catalog, video).await {
            Ok(Some(item)) => item,
            Ok(None) => {
                warn!(video = %label, "Video not found in catalog");
                report.refresh_failed(label);
                return Ok(());
            }
            Err(e) if e.is_recoverable() => {
                warn!(video = %label, error = %e, "Catalog lookup failed");
                report.refresh_failed(label);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        match catalog.refresh(&item).await {
            Ok(()) => {
                info!(video = %label, key = %item.key, "Refreshed catalog item");
                report.refreshed(label);
            }
            Err(e) if e.is_recoverable() => {
                warn!(video = %label, error = %e, "Catalog refresh failed");
                report.refresh_failed(label);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::convert::CueConverter;
    use crate::services::refiner::NoopRefiner;
    use assert_matches::assert_matches;

    async fn pipeline() -> AcquisitionPipeline {
        let db = Database::connect_in_memory().await.unwrap();
        AcquisitionPipeline::new(
            db,
            Arc::new(NoopRefiner),
            Arc::new(ProviderRegistry::with_defaults(None, "test".to_string())),
            Arc::new(CueConverter::new()),
        )
    }

    fn request(path: &Path) -> ScanRequest {
        ScanRequest {
            scan_path: path.to_path_buf(),
            age: Duration::from_secs(7 * 24 * 3600),
            languages: [Language::from_code("fr").unwrap()].into(),
            encoding: "utf-8".to_string(),
            min_score: 0,
            providers: vec!["opensubtitles".to_string()],
            provider_configs: ProviderConfigs::new(),
            max_workers: 2,
            convert_to: None,
        }
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let pipeline = pipeline().await;
        let dir = tempfile::tempdir().unwrap();

        let err = pipeline
            .run(&request(&dir.path().join("missing")), None)
            .await
            .unwrap_err();
        assert_matches!(err.downcast_ref::<ScanError>(), Some(ScanError::InvalidPath(_)));

        let mut bad = request(dir.path());
        bad.max_workers = 0;
        let err = pipeline.run(&bad, None).await.unwrap_err();
        assert_eq!(err.downcast_ref::<ScanError>().map(ScanError::name), Some("ValueError"));

        let mut bad = request(dir.path());
        bad.providers = vec!["nope".to_string()];
        let err = pipeline.run(&bad, None).await.unwrap_err();
        assert!(err.to_string().contains("expected one of opensubtitles"), "{}", err);

        let mut bad = request(dir.path());
        bad.encoding = "klingon".to_string();
        assert!(pipeline.run(&bad, None).await.is_err());

        let mut bad = request(dir.path());
        bad.age = Duration::ZERO;
        assert!(pipeline.run(&bad, None).await.is_err());
    }
}
