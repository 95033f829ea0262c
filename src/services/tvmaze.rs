//! TVMaze API client for episode metadata
//!
//! TVMaze is a free API that doesn't require authentication.
//! Base URL: https://api.tvmaze.com

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::rate_limiter::{RateLimitedClient, ResponseExt, RetryConfig, retry_async};

/// TVMaze API client
pub struct TvMazeClient {
    client: Arc<RateLimitedClient>,
    base_url: String,
    retry_config: RetryConfig,
}

/// Show details from TVMaze
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TvMazeShow {
    pub id: u32,
    pub name: String,
    pub premiered: Option<String>,
    pub externals: Option<TvMazeExternals>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TvMazeExternals {
    pub thetvdb: Option<u32>,
    pub imdb: Option<String>,
}

/// Episode from TVMaze
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TvMazeEpisode {
    pub id: u32,
    pub name: String,
    pub season: u32,
    pub number: Option<u32>,
    pub airdate: Option<String>,
}

impl TvMazeShow {
    /// Year of the premiere date
    pub fn year(&self) -> Option<i32> {
        self.premiered
            .as_deref()
            .and_then(|d| d.get(..4))
            .and_then(|y| y.parse().ok())
    }

    pub fn imdb_id(&self) -> Option<&str> {
        self.externals.as_ref().and_then(|e| e.imdb.as_deref())
    }
}

impl TvMazeClient {
    pub fn new(client: RateLimitedClient) -> Self {
        Self::with_base_url(client, "https://api.tvmaze.com")
    }

    pub fn with_base_url(client: RateLimitedClient, base_url: &str) -> Self {
        Self {
            client: Arc::new(client),
            base_url: base_url.trim_end_matches('/').to_string(),
            retry_config: RetryConfig::default(),
        }
    }

    /// Best matching show for a name, `None` when TVMaze finds nothing
    pub async fn search_single(&self, query: &str) -> Result<Option<TvMazeShow>> {
        debug!(query = %query, "Single search on TVMaze");
        let url = format!("{}/singlesearch/shows", self.base_url);
        self.get_optional(&url, &[("q", query.to_string())], "tvmaze_single_search")
            .await
    }

    /// Episode of a show by season and number
    pub async fn episode_by_number(
        &self,
        show_id: u32,
        season: u32,
        number: u32,
    ) -> Result<Option<TvMazeEpisode>> {
        debug!(show_id, season, number, "Fetching episode from TVMaze");
        let url = format!("{}/shows/{}/episodebynumber", self.base_url, show_id);
        self.get_optional(
            &url,
            &[("season", season.to_string()), ("number", number.to_string())],
            "tvmaze_episode_by_number",
        )
        .await
    }

    async fn get_optional<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        operation: &str,
    ) -> Result<Option<T>> {
        let client = &self.client;
        retry_async(
            || async move {
                let response = client.get_with_query(url, query).await?;

                if response.status().as_u16() == 404 {
                    return Ok(None);
                }

                if response.is_rate_limited() {
                    warn!("TVMaze rate limit hit, will retry");
                    anyhow::bail!("Rate limited (429)");
                }

                if !response.status().is_success() {
                    anyhow::bail!("TVMaze request failed with status: {}", response.status());
                }

                let value: T = response
                    .json()
                    .await
                    .context("Failed to parse TVMaze response")?;
                Ok(Some(value))
            },
            &self.retry_config,
            operation,
        )
        .await
    }
}
