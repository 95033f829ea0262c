//! Plex Media Server catalog
//!
//! Uses the Plex HTTP API with JSON responses:
//! - `GET /library/sections` lists libraries
//! - `GET /library/sections/{key}/all?title=..` searches a library
//! - `GET /library/metadata/{key}/allLeaves` lists a show's episodes
//! - `PUT /library/metadata/{key}/refresh` refreshes an item

use anyhow::{Context, bail};
use async_trait::async_trait;
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use super::{CatalogError, CatalogItem, MediaCatalog};
use crate::services::filename_parser::title_similarity;
use crate::services::rate_limiter::RateLimitedClient;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "MediaContainer")]
    container: MediaContainer,
}

#[derive(Debug, Default, Deserialize)]
struct MediaContainer {
    #[serde(rename = "Directory", default)]
    directories: Vec<Section>,
    #[serde(rename = "Metadata", default)]
    metadata: Vec<Metadata>,
}

#[derive(Debug, Deserialize)]
struct Section {
    key: String,
    #[serde(rename = "type")]
    section_type: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Metadata {
    #[serde(rename = "ratingKey")]
    rating_key: String,
    title: String,
    year: Option<i32>,
    #[serde(rename = "parentIndex")]
    season: Option<u32>,
    #[serde(rename = "index")]
    episode: Option<u32>,
}

impl From<Metadata> for CatalogItem {
    fn from(metadata: Metadata) -> Self {
        Self {
            key: metadata.rating_key,
            title: metadata.title,
        }
    }
}

const TITLE_THRESHOLD: f64 = 0.9;

/// Plex server reached with an `X-Plex-Token`
pub struct PlexCatalog {
    client: RateLimitedClient,
    base_url: String,
    token: String,
}

impl PlexCatalog {
    pub fn new(base_url: &str, token: &str, user_agent: &str) -> anyhow::Result<Self> {
        let parsed = Url::parse(base_url).with_context(|| format!("Invalid Plex URL '{}'", base_url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!("Plex URL must be http or https, got '{}'", base_url);
        }
        Ok(Self {
            client: RateLimitedClient::for_plex(user_agent)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Response, CatalogError> {
        let url = format!("{}{}", self.base_url, path);
        let request = self
            .client
            .inner()
            .request(method, &url)
            .header("X-Plex-Token", &self.token)
            .header("Accept", "application/json")
            .query(query);
        let response = self.client.send(request).await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(CatalogError::NotFound(path.to_string())),
            StatusCode::BAD_REQUEST => Err(CatalogError::BadRequest(path.to_string())),
            status if !status.is_success() => Err(CatalogError::Other(anyhow::anyhow!(
                "Plex request {} failed with status {}",
                path,
                status
            ))),
            _ => Ok(response),
        }
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<MediaContainer, CatalogError> {
        let envelope: Envelope = self
            .request(Method::GET, path, query)
            .await?
            .json()
            .await
            .with_context(|| format!("Failed to parse Plex response for {}", path))?;
        Ok(envelope.container)
    }

    async fn sections(&self, section_type: &str) -> Result<Vec<String>, CatalogError> {
        let container = self.get("/library/sections", &[]).await?;
        Ok(container
            .directories
            .into_iter()
            .filter(|s| s.section_type == section_type)
            .map(|s| s.key)
            .collect())
    }

    /// First item across libraries of `section_type` whose title is close
    /// enough and whose year matches
    async fn search(
        &self,
        section_type: &str,
        title: &str,
        year: Option<i32>,
    ) -> Result<Option<Metadata>, CatalogError> {
        for section in self.sections(section_type).await? {
            let path = format!("/library/sections/{}/all", section);
            let container = self.get(&path, &[("title", title.to_string())]).await?;
            let found = container.metadata.into_iter().find(|m| {
                title_similarity(&m.title, title) >= TITLE_THRESHOLD
                    && (year.is_none() || m.year.is_none() || m.year == year)
            });
            if found.is_some() {
                return Ok(found);
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl MediaCatalog for PlexCatalog {
    async fn find_movie(&self, title: &str, year: Option<i32>) -> Result<Option<CatalogItem>, CatalogError> {
        debug!(title = %title, ?year, "Searching Plex for movie");
        Ok(self.search("movie", title, year).await?.map(CatalogItem::from))
    }

    async fn find_episode(
        &self,
        series: &str,
        year: Option<i32>,
        season: u32,
        episode: u32,
    ) -> Result<Option<CatalogItem>, CatalogError> {
        debug!(series = %series, ?year, season, episode, "Searching Plex for episode");
        let Some(show) = self.search("show", series, year).await? else {
            return Ok(None);
        };

        let path = format!("/library/metadata/{}/allLeaves", show.rating_key);
        let container = self.get(&path, &[]).await?;
        Ok(container
            .metadata
            .into_iter()
            .find(|m| m.season == Some(season) && m.episode == Some(episode))
            .map(CatalogItem::from))
    }

    async fn refresh(&self, item: &CatalogItem) -> Result<(), CatalogError> {
        let path = format!("/library/metadata/{}/refresh", item.key);
        self.request(Method::PUT, &path, &[]).await?;
        info!(key = %item.key, title = %item.title, "Refreshed Plex item");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_urls() {
        assert!(PlexCatalog::new("http://plex.local:32400/", "token", "test").is_ok());
        assert!(PlexCatalog::new("plex.local", "token", "test").is_err());
        assert!(PlexCatalog::new("ftp://plex.local", "token", "test").is_err());
    }

    #[test]
    fn test_parse_sections() {
        let json = r#"{"MediaContainer": {"size": 2, "Directory": [
            {"key": "1", "type": "movie", "title": "Movies"},
            {"key": "2", "type": "show", "title": "TV Shows"}
        ]}}"#;
        let envelope: Envelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.container.directories.len(), 2);
        assert_eq!(envelope.container.directories[1].section_type, "show");
        assert!(envelope.container.metadata.is_empty());
    }

    #[test]
    fn test_parse_episodes() {
        let json = r#"{"MediaContainer": {"Metadata": [
            {"ratingKey": "501", "title": "Pilot", "parentIndex": 1, "index": 1},
            {"ratingKey": "502", "title": "The Big Bran Hypothesis", "parentIndex": 1, "index": 2}
        ]}}"#;
        let envelope: Envelope = serde_json::from_str(json).unwrap();
        let item: CatalogItem = envelope.container.metadata[1].clone().into();
        assert_eq!(item.key, "502");
        assert_eq!(envelope.container.metadata[1].episode, Some(2));
    }
}
