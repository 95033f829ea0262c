//! OpenSubtitles.com REST API provider
//!
//! Uses the REST API (v1) for subtitle search and download.
//! API documentation: https://opensubtitles.stoplight.io/docs/opensubtitles-api
//!
//! Searching only needs the API key. Downloading works anonymously with a
//! small daily quota; with credentials in the provider config the provider
//! logs in once and downloads with the JWT token.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{ProviderCredentials, SubtitleCandidate, SubtitleProvider};
use crate::services::filename_parser::guess_release;
use crate::services::language::Language;
use crate::services::rate_limiter::{RateLimitedClient, ResponseExt, RetryConfig, retry_async};
use crate::services::score::{Match, guess_matches};
use crate::services::video::{Video, VideoKind};

pub const PROVIDER_NAME: &str = "opensubtitles";

const BASE_URL: &str = "https://api.opensubtitles.com/api/v1";

/// JWT token and API host handed out at login
#[derive(Debug, Clone)]
struct AuthState {
    token: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
    base_url: Option<String>,
    user: Option<LoginUser>,
}

#[derive(Debug, Deserialize)]
struct LoginUser {
    remaining_downloads: Option<i32>,
    vip: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    total_count: Option<i32>,
    data: Vec<SearchResult>,
}

#[derive(Debug, Clone, Deserialize)]
struct SearchResult {
    id: String,
    attributes: SubtitleAttributes,
}

#[derive(Debug, Clone, Deserialize)]
struct SubtitleAttributes {
    language: Option<String>,
    hearing_impaired: Option<bool>,
    moviehash_match: Option<bool>,
    release: Option<String>,
    feature_details: Option<FeatureDetails>,
    files: Option<Vec<SubtitleFile>>,
}

#[derive(Debug, Clone, Deserialize)]
struct FeatureDetails {
    imdb_id: Option<i64>,
    parent_imdb_id: Option<i64>,
    season_number: Option<i32>,
    episode_number: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
struct SubtitleFile {
    file_id: i64,
}

#[derive(Debug, Deserialize)]
struct DownloadResponse {
    link: String,
    remaining: Option<i32>,
}

/// OpenSubtitles provider
pub struct OpenSubtitlesProvider {
    client: RateLimitedClient,
    api_key: String,
    credentials: Option<ProviderCredentials>,
    retry_config: RetryConfig,
    auth_state: OnceCell<Option<AuthState>>,
}

impl OpenSubtitlesProvider {
    pub fn new(
        api_key: String,
        user_agent: &str,
        credentials: Option<ProviderCredentials>,
    ) -> Result<Self> {
        Ok(Self {
            client: RateLimitedClient::for_opensubtitles(user_agent)?,
            api_key,
            credentials,
            retry_config: RetryConfig {
                max_retries: 3,
                initial_interval: Duration::from_millis(500),
                max_interval: Duration::from_secs(10),
                multiplier: 2.0,
            },
            auth_state: OnceCell::new(),
        })
    }

    /// Log in once per provider instance when credentials are configured
    async fn auth(&self) -> Result<Option<&AuthState>> {
        let state = self
            .auth_state
            .get_or_try_init(|| async {
                let Some(credentials) = &self.credentials else {
                    return Ok(None);
                };
                let (Some(username), Some(password)) = (&credentials.username, &credentials.password)
                else {
                    return Ok(None);
                };
                self.login(username, password).await.map(Some)
            })
            .await?;
        Ok(state.as_ref())
    }

    async fn login(&self, username: &str, password: &str) -> Result<AuthState> {
        info!("Logging into OpenSubtitles API");
        let url = format!("{}/login", BASE_URL);
        let url = url.as_str();
        let client = &self.client;
        let api_key = self.api_key.as_str();

        let login: LoginResponse = retry_async(
            || async move {
                let request = client
                    .inner()
                    .post(url)
                    .header("Api-Key", api_key)
                    .json(&serde_json::json!({ "username": username, "password": password }));
                let response = client.send(request).await?;

                if response.is_rate_limited() {
                    anyhow::bail!("Rate limited (429)");
                }
                if response.status().as_u16() == 401 {
                    anyhow::bail!("Invalid credentials");
                }
                if !response.status().is_success() {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    anyhow::bail!("Login failed with status {}: {}", status, body);
                }

                response
                    .json::<LoginResponse>()
                    .await
                    .context("Failed to parse login response")
            },
            &self.retry_config,
            "opensubtitles_login",
        )
        .await?;

        if let Some(user) = &login.user {
            info!(
                remaining_downloads = ?user.remaining_downloads,
                vip = ?user.vip,
                "OpenSubtitles login successful"
            );
        }

        Ok(AuthState {
            token: login.token,
            base_url: api_base(login.base_url.as_deref()),
        })
    }

    fn search_params(video: &Video, languages: &BTreeSet<Language>) -> Vec<(&'static str, String)> {
        let mut params: Vec<(&'static str, String)> = Vec::new();

        let codes: Vec<&str> = languages
            .iter()
            .filter(|l| !l.is_undefined())
            .map(|l| l.file_tag())
            .collect();
        params.push(("languages", codes.join(",")));

        if let Some(hash) = video.opensubtitles_hash() {
            params.push(("moviehash", hash.to_string()));
        }

        match video.kind {
            VideoKind::Episode => {
                match &video.series_imdb_id {
                    Some(imdb) => params.push(("parent_imdb_id", imdb_number(imdb))),
                    None => {
                        if let Some(series) = &video.series {
                            params.push(("query", series.clone()));
                        }
                    }
                }
                if let Some(season) = video.season {
                    params.push(("season_number", season.to_string()));
                }
                if let Some(episode) = video.episode {
                    params.push(("episode_number", episode.to_string()));
                }
                params.push(("type", "episode".to_string()));
            }
            VideoKind::Movie | VideoKind::Unknown => {
                match &video.imdb_id {
                    Some(imdb) => params.push(("imdb_id", imdb_number(imdb))),
                    None => {
                        if let Some(title) = &video.title {
                            params.push(("query", title.clone()));
                        }
                        if let Some(year) = video.year {
                            params.push(("year", year.to_string()));
                        }
                    }
                }
                params.push(("type", "movie".to_string()));
            }
        }

        params
    }

    fn to_candidate(
        video: &Video,
        result: SearchResult,
        languages: &BTreeSet<Language>,
    ) -> Option<SubtitleCandidate> {
        let attributes = result.attributes;
        let language = attributes
            .language
            .as_deref()
            .and_then(|code| Language::from_code(code.split('-').next().unwrap_or(code)).ok())?;
        if !languages.contains(&language) {
            return None;
        }
        let file_id = attributes.files.as_ref()?.first()?.file_id;

        let mut candidate = SubtitleCandidate::new(PROVIDER_NAME, file_id.to_string(), language);
        candidate.hearing_impaired = attributes.hearing_impaired.unwrap_or(false);

        if let Some(release) = &attributes.release {
            candidate.matches = guess_matches(video, &guess_release(release));
        }
        candidate.release = attributes.release;

        if attributes.moviehash_match == Some(true) {
            candidate.matches.insert(Match::Hash);
        }

        if let Some(details) = &attributes.feature_details {
            let video_imdb = video.imdb_id.as_deref().map(imdb_number);
            if video_imdb.is_some() && video_imdb == details.imdb_id.map(|id| id.to_string()) {
                candidate.matches.insert(Match::ImdbId);
            }
            let series_imdb = video.series_imdb_id.as_deref().map(imdb_number);
            if series_imdb.is_some() && series_imdb == details.parent_imdb_id.map(|id| id.to_string()) {
                candidate.matches.insert(Match::SeriesImdbId);
            }
            if video.kind == VideoKind::Episode {
                if details.season_number.is_some()
                    && details.season_number.map(|s| s as u32) == video.season
                {
                    candidate.matches.insert(Match::Season);
                }
                if details.episode_number.is_some()
                    && details.episode_number.map(|e| e as u32) == video.episode
                {
                    candidate.matches.insert(Match::Episode);
                }
            }
        }

        Some(candidate)
    }
}

#[async_trait]
impl SubtitleProvider for OpenSubtitlesProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn list_subtitles(
        &self,
        video: &Video,
        languages: &BTreeSet<Language>,
    ) -> Result<Vec<SubtitleCandidate>> {
        let params = Self::search_params(video, languages);
        debug!(video = %video.name(), ?params, "Searching OpenSubtitles");

        let url = format!("{}/subtitles", BASE_URL);
        let url = url.as_str();
        let client = &self.client;
        let api_key = self.api_key.as_str();
        let params = params.as_slice();

        let response: SearchResponse = retry_async(
            || async move {
                let request = client
                    .inner()
                    .get(url)
                    .header("Api-Key", api_key)
                    .query(params);
                let response = client.send(request).await?;

                if response.is_rate_limited() {
                    warn!("OpenSubtitles rate limit hit");
                    anyhow::bail!("Rate limited (429)");
                }
                if !response.status().is_success() {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    anyhow::bail!("Search failed with status {}: {}", status, body);
                }

                response
                    .json::<SearchResponse>()
                    .await
                    .context("Failed to parse search response")
            },
            &self.retry_config,
            "opensubtitles_search",
        )
        .await?;

        debug!(total_count = ?response.total_count, "OpenSubtitles search completed");

        Ok(response
            .data
            .into_iter()
            .filter_map(|result| Self::to_candidate(video, result, languages))
            .collect())
    }

    async fn download_subtitle(&self, candidate: &SubtitleCandidate) -> Result<Vec<u8>> {
        let file_id: i64 = candidate
            .id
            .parse()
            .with_context(|| format!("Invalid OpenSubtitles file id '{}'", candidate.id))?;
        let auth = self.auth().await?;
        let base_url = auth.map(|a| a.base_url.as_str()).unwrap_or(BASE_URL);
        let token = auth.map(|a| a.token.as_str());

        let url = format!("{}/download", base_url);
        let url = url.as_str();
        let client = &self.client;
        let api_key = self.api_key.as_str();

        let info: DownloadResponse = retry_async(
            || async move {
                let mut request = client
                    .inner()
                    .post(url)
                    .header("Api-Key", api_key)
                    .json(&serde_json::json!({ "file_id": file_id }));
                if let Some(token) = token {
                    request = request.bearer_auth(token);
                }
                let response = client.send(request).await?;

                if response.is_rate_limited() {
                    anyhow::bail!("Rate limited (429)");
                }
                if response.status().as_u16() == 406 {
                    anyhow::bail!("Download quota exhausted");
                }
                if !response.status().is_success() {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    anyhow::bail!("Download request failed with status {}: {}", status, body);
                }

                response
                    .json::<DownloadResponse>()
                    .await
                    .context("Failed to parse download response")
            },
            &self.retry_config,
            "opensubtitles_download_info",
        )
        .await?;

        let link = info.link.as_str();
        let content = retry_async(
            || async move {
                let response = client.send(client.inner().get(link)).await?;
                if !response.status().is_success() {
                    anyhow::bail!("Failed to download subtitle file: {}", response.status());
                }
                Ok(response.bytes().await?.to_vec())
            },
            &self.retry_config,
            "opensubtitles_download_file",
        )
        .await?;

        info!(file_id, remaining = ?info.remaining, "Subtitle downloaded from OpenSubtitles");
        Ok(content)
    }
}

/// IMDb ids are sent without the `tt` prefix and leading zeros
fn imdb_number(imdb_id: &str) -> String {
    let digits = imdb_id.trim_start_matches("tt").trim_start_matches('0');
    if digits.is_empty() { "0".to_string() } else { digits.to_string() }
}

/// Login returns a bare host; build the API root from it
fn api_base(host: Option<&str>) -> String {
    match host {
        Some(h) if h.starts_with("http") => format!("{}/api/v1", h.trim_end_matches('/')),
        Some(h) if !h.is_empty() => format!("https://{}/api/v1", h.trim_end_matches('/')),
        _ => BASE_URL.to_string(),
    }
}
