//! Integration tests for the subtitle acquisition pipeline
//!
//! These tests run the full flow against a temporary library with fake
//! collaborators:
//! - request validation
//! - collect/ignore classification and saving
//! - duplicate filtering across runs
//! - catalog refresh and format conversion
//! - worker pool bounds
//! - job execution bookkeeping

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use anyhow::{Result, anyhow};
use assert_matches::assert_matches;
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{Value as JsonValue, json};

use subtitle_scheduler::config::Config;
use subtitle_scheduler::db::{Database, ExecutionState};
use subtitle_scheduler::jobs::{JobContext, JobRunner, ScanJob};
use subtitle_scheduler::services::catalog::{CatalogError, CatalogItem, MediaCatalog};
use subtitle_scheduler::services::convert::{ConversionError, CueConverter};
use subtitle_scheduler::services::providers::{
    ProviderConfigs, ProviderRegistry, SubtitleCandidate, SubtitleProvider,
};
use subtitle_scheduler::services::refiner::NoopRefiner;
use subtitle_scheduler::services::score::Match;
use subtitle_scheduler::services::{
    AcquisitionPipeline, Language, RunReport, ScanError, ScanRequest, SubtitleFormat, Video,
};

const SRT: &[u8] = b"1\n00:00:01,000 --> 00:00:02,000\nBonjour\n";
/// Detected as SubRip, but its second timing has a non-ASCII fraction
const GARBLED_SRT: &[u8] =
    "1\n00:00:01,000 --> 00:00:02,000\nBonjour\n\n2\n00:00:03,00\u{e9} --> 00:00:04,000\nSalut\n".as_bytes();

// ============================================================================
// Fakes
// ============================================================================

/// Offers one candidate per requested language, matching title and year
struct FakeProvider {
    name: &'static str,
    content: &'static [u8],
    fail: bool,
    calls: Arc<Calls>,
}

/// Provider call counters shared by every fake provider of a harness
#[derive(Default)]
struct Calls {
    listed: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl SubtitleProvider for FakeProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn list_subtitles(
        &self,
        _video: &Video,
        languages: &BTreeSet<Language>,
    ) -> Result<Vec<SubtitleCandidate>> {
        self.calls.listed.fetch_add(1, Ordering::SeqCst);
        let current = self.calls.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.calls.peak.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.calls.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail {
            return Err(anyhow!("provider is down"));
        }
        Ok(languages
            .iter()
            .map(|language| {
                let mut candidate = SubtitleCandidate::new(self.name, "1", *language);
                candidate.matches = [Match::Title, Match::Year].into();
                candidate
            })
            .collect())
    }

    async fn download_subtitle(&self, _candidate: &SubtitleCandidate) -> Result<Vec<u8>> {
        Ok(self.content.to_vec())
    }
}

#[derive(Clone, Copy)]
enum CatalogBehavior {
    Found,
    NotFound,
    BadRequest,
    Down,
}

struct FakeCatalog {
    behavior: CatalogBehavior,
    refreshed: AtomicUsize,
}

impl FakeCatalog {
    fn new(behavior: CatalogBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            refreshed: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl MediaCatalog for FakeCatalog {
    async fn find_movie(&self, title: &str, _year: Option<i32>) -> Result<Option<CatalogItem>, CatalogError> {
        match self.behavior {
            CatalogBehavior::Found | CatalogBehavior::BadRequest => Ok(Some(CatalogItem {
                key: "42".to_string(),
                title: title.to_string(),
            })),
            CatalogBehavior::NotFound => Err(CatalogError::NotFound(title.to_string())),
            CatalogBehavior::Down => Err(CatalogError::Other(anyhow!("connection refused"))),
        }
    }

    async fn find_episode(
        &self,
        _series: &str,
        _year: Option<i32>,
        _season: u32,
        _episode: u32,
    ) -> Result<Option<CatalogItem>, CatalogError> {
        Ok(None)
    }

    async fn refresh(&self, item: &CatalogItem) -> Result<(), CatalogError> {
        if let CatalogBehavior::BadRequest = self.behavior {
            return Err(CatalogError::BadRequest(item.key.clone()));
        }
        self.refreshed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// A month from now, so freshly written files count as old
fn later() -> SystemTime {
    SystemTime::now() + Duration::from_secs(30 * 24 * 60 * 60)
}

struct Harness {
    db: Database,
    pipeline: Arc<AcquisitionPipeline>,
    calls: Arc<Calls>,
}

async fn harness() -> Harness {
    let db = Database::connect_in_memory().await.unwrap();
    let calls = Arc::new(Calls::default());

    let mut registry = ProviderRegistry::new();
    for (name, content, fail) in [
        ("fake", SRT, false),
        ("broken", SRT, true),
        ("garbled", GARBLED_SRT, false),
    ] {
        let calls = calls.clone();
        registry.register(name, move |_| {
            Ok(Arc::new(FakeProvider {
                name,
                content,
                fail,
                calls: calls.clone(),
            }) as Arc<dyn SubtitleProvider>)
        });
    }

    let pipeline = AcquisitionPipeline::new(
        db.clone(),
        Arc::new(NoopRefiner),
        Arc::new(registry),
        Arc::new(CueConverter::new()),
    )
    .with_clock(later);

    Harness {
        db,
        pipeline: Arc::new(pipeline),
        calls,
    }
}

impl Harness {
    fn listed(&self) -> usize {
        self.calls.listed.load(Ordering::SeqCst)
    }
}

fn french() -> BTreeSet<Language> {
    [Language::from_code("fr").unwrap()].into()
}

fn request(path: &Path) -> ScanRequest {
    ScanRequest {
        scan_path: path.to_path_buf(),
        age: Duration::from_secs(7 * 24 * 60 * 60),
        languages: french(),
        encoding: "utf-8".to_string(),
        min_score: 50,
        providers: vec!["fake".to_string()],
        provider_configs: ProviderConfigs::new(),
        max_workers: 2,
        convert_to: None,
    }
}

fn library() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Inception.2010.mkv"), b"not really a video").unwrap();
    dir
}

// ============================================================================
// Validation
// ============================================================================

mod validation {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn missing_scan_path_is_a_path_error() {
        let h = harness().await;
        let dir = library();

        let err = h
            .pipeline
            .run(&request(&dir.path().join("missing")), None)
            .await
            .unwrap_err();
        assert_eq!(err.downcast_ref::<ScanError>().map(ScanError::name), Some("PathError"));
        assert_eq!(h.db.dedup().count().await.unwrap(), 0);
        assert_eq!(h.listed(), 0);
    }

    #[tokio::test]
    async fn invalid_values_fail_without_side_effects() {
        let h = harness().await;
        let dir = library();

        let mut empty_languages = request(dir.path());
        empty_languages.languages.clear();
        let mut no_providers = request(dir.path());
        no_providers.providers.clear();
        let mut no_workers = request(dir.path());
        no_workers.max_workers = 0;
        let mut too_young = request(dir.path());
        too_young.age = Duration::ZERO;

        for bad in [empty_languages, no_providers, no_workers, too_young] {
            let err = h.pipeline.run(&bad, None).await.unwrap_err();
            assert_eq!(err.downcast_ref::<ScanError>().map(ScanError::name), Some("ValueError"));
        }

        assert_eq!(h.db.dedup().count().await.unwrap(), 0);
        assert_eq!(h.listed(), 0);
        assert!(!dir.path().join("Inception.2010.fr.srt").exists());
    }
}

// ============================================================================
// End to end
// ============================================================================

mod end_to_end {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn old_movie_without_subtitles_is_collected_and_saved() {
        let h = harness().await;
        let dir = library();

        let report = h.pipeline.run(&request(dir.path()), None).await.unwrap();
        let value = serde_json::to_value(&report).unwrap();

        assert_eq!(value["videos"], json!({"collected": ["Inception.2010.mkv"]}));
        assert_eq!(value["subtitles"], json!({"Inception.2010.mkv": {"fake": 1}, "total": 1}));
        assert!(value.get("providers").is_none());
        assert!(value.get("catalog").is_none());
        for key in ["start", "end", "duration"] {
            assert!(value["meta"].get(key).is_some(), "meta.{} missing", key);
        }

        let saved = dir.path().join("Inception.2010.fr.srt");
        assert_eq!(std::fs::read(&saved).unwrap(), SRT);
        assert_eq!(h.db.dedup().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn movie_with_existing_subtitle_is_ignored() {
        let h = harness().await;
        let dir = library();
        std::fs::write(dir.path().join("Inception.2010.fr.srt"), SRT).unwrap();

        let report = h.pipeline.run(&request(dir.path()), None).await.unwrap();
        let value = serde_json::to_value(&report).unwrap();

        assert_eq!(value["videos"], json!({"ignored": ["Inception.2010.mkv"]}));
        assert!(value.get("subtitles").is_none());
        assert_eq!(h.listed(), 0);
    }

    #[tokio::test]
    async fn recent_videos_are_not_discovered() {
        let h = harness().await;
        let dir = library();

        let mut recent = request(dir.path());
        recent.age = Duration::from_secs(365 * 24 * 60 * 60);
        let report = h.pipeline.run(&recent, None).await.unwrap();

        assert_eq!(report.videos, None);
        assert_eq!(report.subtitles, None);
    }

    #[tokio::test]
    async fn failing_provider_is_reported_as_discarded() {
        let h = harness().await;
        let dir = library();

        let mut both = request(dir.path());
        both.providers = vec!["broken".to_string(), "fake".to_string()];
        let report = h.pipeline.run(&both, None).await.unwrap();

        assert_eq!(report.total_subtitles(), 1);
        assert_eq!(
            report.providers.map(|p| p.discarded),
            Some(vec!["broken".to_string()])
        );
    }
}

// ============================================================================
// Duplicate filtering
// ============================================================================

mod idempotence {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn second_run_saves_nothing_new() {
        let h = harness().await;
        let dir = library();

        let first = h.pipeline.run(&request(dir.path()), None).await.unwrap();
        assert_eq!(first.total_subtitles(), 1);

        let second = h.pipeline.run(&request(dir.path()), None).await.unwrap();
        assert_eq!(second.total_subtitles(), 0);
        assert_eq!(second.ignored(), ["Inception.2010.mkv"]);
        assert_eq!(h.db.dedup().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn already_saved_content_is_not_saved_again() {
        let h = harness().await;
        let dir = library();
        let saved = dir.path().join("Inception.2010.fr.srt");

        h.pipeline.run(&request(dir.path()), None).await.unwrap();
        std::fs::remove_file(&saved).unwrap();

        let report = h.pipeline.run(&request(dir.path()), None).await.unwrap();
        let subtitles = report.subtitles.unwrap();

        assert_eq!(report.videos.unwrap().collected, vec!["Inception.2010.mkv"]);
        assert_eq!(subtitles.total, 0);
        assert!(subtitles.saved.is_empty());
        assert_eq!(subtitles.discarded, vec![saved.to_string_lossy().to_string()]);
        assert!(!saved.exists());
        assert_eq!(h.db.dedup().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_save_leaves_no_dedup_record() {
        let h = harness().await;
        let dir = tempfile::tempdir().unwrap();
        // The video name fits the file system limit, its subtitle name does not
        let stem = format!("Inception.2010.{}", "x".repeat(235));
        std::fs::write(dir.path().join(format!("{}.mkv", stem)), b"not really a video").unwrap();

        let first = h.pipeline.run(&request(dir.path()), None).await;
        assert!(first.is_err());
        assert_eq!(h.db.dedup().count().await.unwrap(), 0);

        let second = h.pipeline.run(&request(dir.path()), None).await;
        assert!(second.is_err(), "the subtitle must not be discarded as already saved");
        assert_eq!(h.db.dedup().count().await.unwrap(), 0);
    }
}

// ============================================================================
// Catalog refresh and conversion
// ============================================================================

mod post_processing {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn run_with_catalog(h: &Harness, dir: &Path, catalog: Arc<FakeCatalog>) -> Result<RunReport> {
        h.pipeline
            .run(&request(dir), Some(catalog as Arc<dyn MediaCatalog>))
            .await
    }

    #[tokio::test]
    async fn catalog_refresh_is_recorded() {
        let h = harness().await;
        let dir = library();
        let catalog = FakeCatalog::new(CatalogBehavior::Found);

        let report = run_with_catalog(&h, dir.path(), catalog.clone()).await.unwrap();

        let section = report.catalog.unwrap();
        assert_eq!(section.refreshed, vec!["Inception (2010)"]);
        assert!(section.failed.is_empty());
        assert_eq!(catalog.refreshed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn catalog_not_found_is_recorded_as_failure() {
        let h = harness().await;
        let dir = library();
        let catalog = FakeCatalog::new(CatalogBehavior::NotFound);

        let report = run_with_catalog(&h, dir.path(), catalog.clone()).await.unwrap();

        assert_eq!(report.total_subtitles(), 1);
        let section = report.catalog.unwrap();
        assert!(section.refreshed.is_empty());
        assert_eq!(section.failed, vec!["Inception (2010)"]);
        assert_eq!(catalog.refreshed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn catalog_bad_request_is_recorded_as_failure() {
        let h = harness().await;
        let dir = library();
        let catalog = FakeCatalog::new(CatalogBehavior::BadRequest);

        let report = run_with_catalog(&h, dir.path(), catalog).await.unwrap();

        assert_eq!(report.total_subtitles(), 1);
        let section = report.catalog.unwrap();
        assert!(section.refreshed.is_empty());
        assert_eq!(section.failed, vec!["Inception (2010)"]);
    }

    #[tokio::test]
    async fn unreachable_catalog_fails_the_run() {
        let h = harness().await;
        let dir = library();
        let catalog = FakeCatalog::new(CatalogBehavior::Down);

        let err = run_with_catalog(&h, dir.path(), catalog).await.unwrap_err();

        assert_matches!(err.downcast_ref::<CatalogError>(), Some(CatalogError::Other(_)));
        // The subtitle was saved before the refresh step
        assert!(dir.path().join("Inception.2010.fr.srt").exists());
    }

    #[tokio::test]
    async fn saved_subtitles_are_converted() {
        let h = harness().await;
        let dir = library();

        let mut convert = request(dir.path());
        convert.convert_to = Some(SubtitleFormat::WebVtt);
        let report = h.pipeline.run(&convert, None).await.unwrap();

        assert_eq!(
            report.subtitles.unwrap().converted,
            vec!["Inception.2010.fr.srt: srt -> vtt"]
        );
        let content = std::fs::read_to_string(dir.path().join("Inception.2010.fr.srt")).unwrap();
        assert!(content.starts_with("WEBVTT"));
        assert!(content.contains("00:00:01.000 --> 00:00:02.000"));
    }

    #[tokio::test]
    async fn malformed_timing_fails_conversion_without_panicking() {
        let h = harness().await;
        let dir = library();

        let mut convert = request(dir.path());
        convert.providers = vec!["garbled".to_string()];
        convert.convert_to = Some(SubtitleFormat::WebVtt);
        let err = h.pipeline.run(&convert, None).await.unwrap_err();

        assert_matches!(
            err.downcast_ref::<ConversionError>(),
            Some(ConversionError::InvalidTimestamp(_))
        );
        let saved = std::fs::read(dir.path().join("Inception.2010.fr.srt")).unwrap();
        assert_eq!(saved, GARBLED_SRT);
    }
}

// ============================================================================
// Worker pool
// ============================================================================

mod concurrency {
    use super::*;
    use pretty_assertions::assert_eq;

    fn big_library() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in ["Inception.2010.mkv", "Heat.1995.mkv", "Alien.1979.mkv", "Memento.2000.mkv"] {
            std::fs::write(dir.path().join(name), b"not really a video").unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn provider_queries_are_bounded_by_max_workers() {
        let h = harness().await;
        let dir = big_library();

        let report = h.pipeline.run(&request(dir.path()), None).await.unwrap();

        assert_eq!(report.total_subtitles(), 4);
        assert_eq!(h.listed(), 4);
        let peak = h.calls.peak.load(Ordering::SeqCst);
        assert!((1..=2).contains(&peak), "peak in-flight queries was {}", peak);
    }

    #[tokio::test]
    async fn single_worker_queries_one_video_at_a_time() {
        let h = harness().await;
        let dir = big_library();

        let mut serial = request(dir.path());
        serial.max_workers = 1;
        h.pipeline.run(&serial, None).await.unwrap();

        assert_eq!(h.listed(), 4);
        assert_eq!(h.calls.peak.load(Ordering::SeqCst), 1);
    }
}

// ============================================================================
// Job execution
// ============================================================================

mod jobs {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn runner(h: &Harness) -> JobRunner {
        JobRunner::new(Arc::new(JobContext {
            db: h.db.clone(),
            pipeline: h.pipeline.clone(),
            config: Arc::new(Config::default()),
        }))
    }

    fn args(path: &Path) -> Vec<JsonValue> {
        vec![
            json!(path.to_string_lossy()),
            json!(1),
            json!(["fra"]),
            json!("utf-8"),
            json!(50),
            json!(["fake"]),
            json!({}),
            json!(2),
        ]
    }

    #[tokio::test]
    async fn successful_run_records_downloaded_count() {
        let h = harness().await;
        let dir = library();
        let runner = runner(&h).await;

        let result = runner
            .execute("nightly", &ScanJob, &args(dir.path()))
            .await
            .unwrap();
        assert_eq!(result["subtitles"]["total"], json!(1));

        let executions = h.db.executions().list_for_job("nightly", 10).await.unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].state, ExecutionState::Succeeded);
        assert_eq!(
            executions[0].description.as_deref(),
            Some(format!("pid: {} | downloaded: 1", std::process::id()).as_str())
        );
        assert_eq!(executions[0].result.as_ref(), Some(&result));
    }

    #[tokio::test]
    async fn failed_run_records_error_name() {
        let h = harness().await;
        let dir = library();
        let runner = runner(&h).await;

        let result = runner
            .execute("nightly", &ScanJob, &args(&dir.path().join("missing")))
            .await;
        assert!(result.is_err());

        let executions = h.db.executions().list_for_job("nightly", 10).await.unwrap();
        assert_eq!(executions[0].state, ExecutionState::Failed);
        assert_eq!(
            executions[0].description.as_deref(),
            Some(format!("pid: {} | exception: PathError", std::process::id()).as_str())
        );
        assert_eq!(executions[0].result, None);
    }
}
