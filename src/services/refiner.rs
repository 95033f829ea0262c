//! Metadata refinement for discovered videos
//!
//! Episodes are looked up on TVMaze, movies on TMDB when an API key is
//! configured. Lookups go through the shared [`CacheRegion`] so repeated runs
//! over the same library do not hit the APIs again until entries expire.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::cache::CacheRegion;
use super::filename_parser::normalize_title;
use super::tmdb::{TmdbClient, TmdbMovie};
use super::tvmaze::{TvMazeClient, TvMazeEpisode, TvMazeShow};
use super::video::{Video, VideoKind};

/// Enriches a video's metadata in place
#[async_trait]
pub trait Refiner: Send + Sync {
    async fn refine(&self, video: &mut Video) -> Result<()>;
}

/// Cached lookup result; `value` is `None` when the service had no match
#[derive(Debug, Serialize, Deserialize)]
struct Lookup<T> {
    value: Option<T>,
}

pub struct MetadataRefiner {
    cache: Arc<CacheRegion>,
    tvmaze: TvMazeClient,
    tmdb: Option<TmdbClient>,
}

impl MetadataRefiner {
    pub fn new(cache: Arc<CacheRegion>, tvmaze: TvMazeClient, tmdb: Option<TmdbClient>) -> Self {
        Self { cache, tvmaze, tmdb }
    }

    async fn refine_episode(&self, video: &mut Video) -> Result<()> {
        let (Some(series), Some(season), Some(number)) =
            (video.series.clone(), video.season, video.episode)
        else {
            return Ok(());
        };

        let query = match video.year {
            Some(year) => format!("{} {}", series, year),
            None => series.clone(),
        };
        let key = format!("tvmaze:singlesearch:{}", normalize_title(&query));
        let show: Lookup<TvMazeShow> = self
            .cache
            .get_or_create(&key, || async {
                Ok(Lookup {
                    value: self.tvmaze.search_single(&query).await?,
                })
            })
            .await?;

        let Some(show) = show.value else {
            debug!(series = %series, "Series not found on TVMaze");
            return Ok(());
        };

        video.series = Some(show.name.clone());
        video.tvmaze_id = Some(show.id);
        if let Some(imdb) = show.imdb_id() {
            video.series_imdb_id = Some(imdb.to_string());
        }

        let key = format!("tvmaze:episode:{}:{}:{}", show.id, season, number);
        let episode: Lookup<TvMazeEpisode> = self
            .cache
            .get_or_create(&key, || async {
                Ok(Lookup {
                    value: self.tvmaze.episode_by_number(show.id, season, number).await?,
                })
            })
            .await?;

        if let Some(episode) = episode.value {
            video.title = Some(episode.name);
        }

        info!(video = %video.name(), label = %video.label(), "Refined episode");
        Ok(())
    }

    async fn refine_movie(&self, video: &mut Video) -> Result<()> {
        let Some(tmdb) = &self.tmdb else {
            return Ok(());
        };
        let Some(title) = video.title.clone() else {
            return Ok(());
        };
        let year = video.year;

        let key = format!(
            "tmdb:movie:{}:{}",
            normalize_title(&title),
            year.map(|y| y.to_string()).unwrap_or_default()
        );
        let movie: Lookup<TmdbMovie> = self
            .cache
            .get_or_create(&key, || async {
                let Some(found) = tmdb.search_movies(&title, year).await?.into_iter().next() else {
                    return Ok(Lookup { value: None });
                };
                // Search results carry no IMDb id
                Ok(Lookup {
                    value: Some(tmdb.get_movie(found.id).await?),
                })
            })
            .await?;

        let Some(movie) = movie.value else {
            debug!(title = %title, "Movie not found on TMDB");
            return Ok(());
        };

        video.year = video.year.or(movie.year());
        video.title = Some(movie.title);
        video.tmdb_id = Some(movie.id);
        video.imdb_id = movie.imdb_id.filter(|id| !id.is_empty());

        info!(video = %video.name(), label = %video.label(), "Refined movie");
        Ok(())
    }
}

#[async_trait]
impl Refiner for MetadataRefiner {
    async fn refine(&self, video: &mut Video) -> Result<()> {
        match video.kind {
            VideoKind::Episode => self.refine_episode(video).await,
            VideoKind::Movie => self.refine_movie(video).await,
            VideoKind::Unknown => Ok(()),
        }
    }
}

/// Refiner that leaves videos untouched
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRefiner;

#[async_trait]
impl Refiner for NoopRefiner {
    async fn refine(&self, _video: &mut Video) -> Result<()> {
        Ok(())
    }
}
