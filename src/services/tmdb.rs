//! TMDB (The Movie Database) API client for movie metadata
//!
//! Base URL: https://api.themoviedb.org/3
//!
//! Rate limiting: TMDB allows ~40 requests per 10 seconds.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::rate_limiter::{RateLimitedClient, ResponseExt, RetryConfig, retry_async};

/// TMDB API client with rate limiting and retry logic
pub struct TmdbClient {
    client: Arc<RateLimitedClient>,
    base_url: String,
    api_key: String,
    retry_config: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbMovieSearchResult {
    pub page: i32,
    pub results: Vec<TmdbMovie>,
}

/// Movie as returned by search and details endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbMovie {
    pub id: i32,
    pub title: String,
    pub original_title: Option<String>,
    pub release_date: Option<String>,
    /// Only in movie details
    pub imdb_id: Option<String>,
}

impl TmdbMovie {
    pub fn year(&self) -> Option<i32> {
        self.release_date
            .as_deref()
            .and_then(|d| d.get(..4))
            .and_then(|y| y.parse().ok())
    }
}

impl TmdbClient {
    pub fn new(client: RateLimitedClient, api_key: String) -> Self {
        Self {
            client: Arc::new(client),
            base_url: "https://api.themoviedb.org/3".to_string(),
            api_key,
            retry_config: RetryConfig {
                max_retries: 3,
                initial_interval: Duration::from_millis(500),
                max_interval: Duration::from_secs(10),
                multiplier: 2.0,
            },
        }
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Search for movies by title
    pub async fn search_movies(&self, query: &str, year: Option<i32>) -> Result<Vec<TmdbMovie>> {
        if !self.has_api_key() {
            anyhow::bail!("TMDB API key not configured");
        }

        info!(
            "Searching TMDB for movie '{}'{}",
            query,
            year.map(|y| format!(" ({})", y)).unwrap_or_default()
        );

        let url = format!("{}/search/movie", self.base_url);
        let mut params: Vec<(&str, String)> = vec![
            ("api_key", self.api_key.clone()),
            ("query", query.to_string()),
            ("include_adult", "false".to_string()),
        ];
        if let Some(y) = year {
            params.push(("year", y.to_string()));
        }

        let results: TmdbMovieSearchResult = self.get_json(&url, &params, "tmdb_search_movies").await?;
        debug!(count = results.results.len(), "TMDB search returned results");
        Ok(results.results)
    }

    /// Movie details by TMDB id (carries the IMDb id)
    pub async fn get_movie(&self, tmdb_id: i32) -> Result<TmdbMovie> {
        if !self.has_api_key() {
            anyhow::bail!("TMDB API key not configured");
        }

        debug!("Fetching movie details from TMDB (ID: {})", tmdb_id);
        let url = format!("{}/movie/{}", self.base_url, tmdb_id);
        self.get_json(&url, &[("api_key", self.api_key.clone())], "tmdb_get_movie")
            .await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
        operation: &str,
    ) -> Result<T> {
        let client = &self.client;
        retry_async(
            || async move {
                let response = client.get_with_query(url, params).await?;

                if response.is_rate_limited() {
                    warn!("TMDB rate limit hit, will retry");
                    anyhow::bail!("Rate limited (429)");
                }

                if response.status().as_u16() == 401 {
                    anyhow::bail!("TMDB API key is invalid");
                }

                if !response.status().is_success() {
                    anyhow::bail!("TMDB request failed with status: {}", response.status());
                }

                response
                    .json::<T>()
                    .await
                    .context("Failed to parse TMDB response")
            },
            &self.retry_config,
            operation,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_year_parsing() {
        let movie = TmdbMovie {
            id: 49521,
            title: "Man of Steel".to_string(),
            original_title: None,
            release_date: Some("2013-06-12".to_string()),
            imdb_id: Some("tt0770828".to_string()),
        };
        assert_eq!(movie.year(), Some(2013));

        let undated = TmdbMovie {
            release_date: Some(String::new()),
            ..movie
        };
        assert_eq!(undated.year(), None);
    }
}
