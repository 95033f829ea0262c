//! Subtitle providers
//!
//! A [`SubtitleProvider`] lists and downloads candidates for one video. The
//! [`ProviderPool`] fans queries out over every configured provider with a
//! bounded number of concurrent calls, and remembers providers that failed
//! during the run so they are not queried again.

pub mod opensubtitles;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::convert::detect_format;
use super::language::Language;
use super::score::{Match, compute_score};
use super::video::Video;

pub use opensubtitles::OpenSubtitlesProvider;

/// Credentials for one provider, as passed in the job's provider configs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCredentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Provider configs keyed by provider name
pub type ProviderConfigs = BTreeMap<String, ProviderCredentials>;

/// A scored subtitle offered by a provider
#[derive(Clone)]
pub struct SubtitleCandidate {
    /// Name of the originating provider
    pub provider: String,
    /// Provider-specific identifier used to download the content
    pub id: String,
    pub language: Language,
    pub release: Option<String>,
    pub hearing_impaired: bool,
    pub matches: BTreeSet<Match>,
    pub score: u32,
    /// Raw bytes, filled once downloaded
    pub content: Option<Vec<u8>>,
}

impl SubtitleCandidate {
    pub fn new(provider: &str, id: impl Into<String>, language: Language) -> Self {
        Self {
            provider: provider.to_string(),
            id: id.into(),
            language,
            release: None,
            hearing_impaired: false,
            matches: BTreeSet::new(),
            score: 0,
            content: None,
        }
    }
}

impl fmt::Debug for SubtitleCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubtitleCandidate")
            .field("provider", &self.provider)
            .field("id", &self.id)
            .field("language", &self.language)
            .field("score", &self.score)
            .field("content_len", &self.content.as_ref().map(Vec::len))
            .finish()
    }
}

/// A source of subtitles
#[async_trait]
pub trait SubtitleProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Candidates for `video` in any of `languages`, with their matches filled in
    async fn list_subtitles(
        &self,
        video: &Video,
        languages: &BTreeSet<Language>,
    ) -> Result<Vec<SubtitleCandidate>>;

    /// Raw content of a candidate
    async fn download_subtitle(&self, candidate: &SubtitleCandidate) -> Result<Vec<u8>>;
}

type ProviderBuilder =
    Box<dyn Fn(Option<&ProviderCredentials>) -> Result<Arc<dyn SubtitleProvider>> + Send + Sync>;

/// Builds providers by name
#[derive(Default)]
pub struct ProviderRegistry {
    builders: BTreeMap<String, ProviderBuilder>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in provider
    pub fn with_defaults(api_key: Option<String>, user_agent: String) -> Self {
        let mut registry = Self::new();
        registry.register(opensubtitles::PROVIDER_NAME, move |credentials| {
            let provider = OpenSubtitlesProvider::new(
                api_key.clone().unwrap_or_default(),
                &user_agent,
                credentials.cloned(),
            )?;
            Ok(Arc::new(provider) as Arc<dyn SubtitleProvider>)
        });
        registry
    }

    pub fn register<F>(&mut self, name: &str, builder: F)
    where
        F: Fn(Option<&ProviderCredentials>) -> Result<Arc<dyn SubtitleProvider>> + Send + Sync + 'static,
    {
        self.builders.insert(name.to_string(), Box::new(builder));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.builders.keys().cloned().collect()
    }

    /// Instantiate the named providers with their credentials
    pub fn build(&self, names: &[String], configs: &ProviderConfigs) -> Result<Vec<Arc<dyn SubtitleProvider>>> {
        names
            .iter()
            .map(|name| {
                let builder = self
                    .builders
                    .get(name)
                    .with_context(|| format!("Unknown provider '{}'", name))?;
                builder(configs.get(name))
            })
            .collect()
    }
}

/// Queries several providers with bounded concurrency
pub struct ProviderPool {
    providers: Vec<Arc<dyn SubtitleProvider>>,
    semaphore: Arc<Semaphore>,
    discarded: Mutex<BTreeSet<String>>,
}

impl ProviderPool {
    pub fn new(providers: Vec<Arc<dyn SubtitleProvider>>, max_workers: usize) -> Self {
        Self {
            providers,
            semaphore: Arc::new(Semaphore::new(max_workers.max(1))),
            discarded: Mutex::new(BTreeSet::new()),
        }
    }

    /// Providers that failed during this run
    pub fn discarded_providers(&self) -> Vec<String> {
        self.discarded.lock().iter().cloned().collect()
    }

    fn is_discarded(&self, name: &str) -> bool {
        self.discarded.lock().contains(name)
    }

    fn discard(&self, name: &str, error: &anyhow::Error) {
        warn!(provider = %name, error = %error, "Discarding provider");
        self.discarded.lock().insert(name.to_string());
    }

    /// Candidates from every provider still in use, scored against `video`
    pub async fn list_subtitles(
        &self,
        video: &Video,
        languages: &BTreeSet<Language>,
    ) -> Vec<SubtitleCandidate> {
        let queries = self
            .providers
            .iter()
            .filter(|provider| !self.is_discarded(provider.name()))
            .map(|provider| async move {
                let listed = async {
                    let _permit = self
                        .semaphore
                        .acquire()
                        .await
                        .context("Provider pool closed")?;
                    provider.list_subtitles(video, languages).await
                }
                .await;
                (provider.name().to_string(), listed)
            });

        let mut candidates = Vec::new();
        for (name, listed) in futures::future::join_all(queries).await {
            match listed {
                Ok(found) => {
                    debug!(provider = %name, video = %video.name(), count = found.len(), "Listed subtitles");
                    candidates.extend(found);
                }
                Err(e) => self.discard(&name, &e),
            }
        }

        for candidate in &mut candidates {
            if !candidate.hearing_impaired {
                candidate.matches.insert(Match::HearingImpaired);
            }
            candidate.score = compute_score(&candidate.matches, video);
        }

        candidates
    }

    /// Download one candidate; `None` when the provider fails or is discarded
    pub async fn download_subtitle(&self, candidate: &SubtitleCandidate) -> Option<Vec<u8>> {
        if self.is_discarded(&candidate.provider) {
            return None;
        }
        let provider = self
            .providers
            .iter()
            .find(|p| p.name() == candidate.provider)?;

        let downloaded = async {
            let _permit = self
                .semaphore
                .acquire()
                .await
                .context("Provider pool closed")?;
            provider.download_subtitle(candidate).await
        }
        .await;

        match downloaded {
            Ok(content) => Some(content),
            Err(e) => {
                self.discard(&candidate.provider, &e);
                None
            }
        }
    }

    /// Download the best candidate per language.
    ///
    /// Candidates are tried from the highest score down; the search stops at
    /// the first one below `min_score`. Invalid downloads are skipped.
    pub async fn download_best_subtitles(
        &self,
        mut candidates: Vec<SubtitleCandidate>,
        video: &Video,
        languages: &BTreeSet<Language>,
        min_score: f64,
    ) -> Vec<SubtitleCandidate> {
        candidates.sort_by(|a, b| b.score.cmp(&a.score));

        let mut downloaded: Vec<SubtitleCandidate> = Vec::new();
        for mut candidate in candidates {
            if f64::from(candidate.score) < min_score {
                debug!(video = %video.name(), score = candidate.score, min_score, "No more candidates above the minimum score");
                break;
            }
            if downloaded.iter().any(|d| d.language == candidate.language) {
                continue;
            }

            let Some(content) = self.download_subtitle(&candidate).await else {
                continue;
            };
            if !is_valid_subtitle(&content) {
                warn!(provider = %candidate.provider, id = %candidate.id, "Skipping invalid subtitle");
                continue;
            }

            info!(
                video = %video.name(),
                provider = %candidate.provider,
                language = %candidate.language,
                score = candidate.score,
                "Downloaded subtitle"
            );
            candidate.content = Some(content);
            downloaded.push(candidate);

            if languages.iter().all(|l| downloaded.iter().any(|d| d.language == *l)) {
                break;
            }
        }

        downloaded
    }
}

/// Non-empty content in a recognizable subtitle format
pub fn is_valid_subtitle(content: &[u8]) -> bool {
    !content.is_empty() && detect_format(content).is_some()
}
