//! Media-server catalogs refreshed after new subtitles are saved

pub mod plex;

use async_trait::async_trait;
use thiserror::Error;

use super::video::{Video, VideoKind};

pub use plex::PlexCatalog;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog item not found: {0}")]
    NotFound(String),
    #[error("catalog rejected the request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CatalogError {
    /// Errors recorded per video instead of failing the run
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::BadRequest(_))
    }
}

/// An item in the media server's library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogItem {
    pub key: String,
    pub title: String,
}

/// Locates library items and triggers their metadata refresh
#[async_trait]
pub trait MediaCatalog: Send + Sync {
    async fn find_movie(&self, title: &str, year: Option<i32>) -> Result<Option<CatalogItem>, CatalogError>;

    async fn find_episode(
        &self,
        series: &str,
        year: Option<i32>,
        season: u32,
        episode: u32,
    ) -> Result<Option<CatalogItem>, CatalogError>;

    async fn refresh(&self, item: &CatalogItem) -> Result<(), CatalogError>;
}

/// Locate the catalog item for a video
pub async fn find_video(
    catalog: &dyn MediaCatalog,
    video: &Video,
) -> Result<Option<CatalogItem>, CatalogError> {
    match video.kind {
        VideoKind::Episode => {
            let (Some(series), Some(season), Some(episode)) =
                (video.series.as_deref(), video.season, video.episode)
            else {
                return Ok(None);
            };
            catalog.find_episode(series, video.year, season, episode).await
        }
        VideoKind::Movie => match video.title.as_deref() {
            Some(title) => catalog.find_movie(title, video.year).await,
            None => Ok(None),
        },
        VideoKind::Unknown => Ok(None),
    }
}
