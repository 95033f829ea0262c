//! Application configuration management

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database path holding the dedup log, cache entries and job history
    pub database_path: String,

    /// Maximum pooled database connections
    pub database_max_connections: u32,

    /// YAML file with the scheduled job definitions
    pub jobs_file: String,

    /// How long cached metadata lookups stay valid
    pub cache_expiration: Duration,

    /// OpenSubtitles REST API key
    pub opensubtitles_api_key: Option<String>,

    /// TMDB API key (movie refinement is skipped without it)
    pub tmdb_api_key: Option<String>,

    /// User agent sent to subtitle providers
    pub user_agent: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let cache_days: u64 = env::var("CACHE_EXPIRATION_DAYS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .context("Invalid CACHE_EXPIRATION_DAYS")?;

        Ok(Self {
            database_path: env::var("DATABASE_PATH")
                .or_else(|_| env::var("DATABASE_URL"))
                .unwrap_or_else(|_| "./data/subtitles.db".to_string()),

            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),

            jobs_file: env::var("JOBS_FILE").unwrap_or_else(|_| "./jobs.yaml".to_string()),

            cache_expiration: Duration::from_secs(cache_days * 24 * 60 * 60),

            opensubtitles_api_key: env::var("OPENSUBTITLES_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),

            tmdb_api_key: env::var("TMDB_API_KEY").ok().filter(|k| !k.trim().is_empty()),

            user_agent: env::var("USER_AGENT")
                .unwrap_or_else(|_| format!("subtitle-scheduler v{}", env!("CARGO_PKG_VERSION"))),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "./data/subtitles.db".to_string(),
            database_max_connections: 5,
            jobs_file: "./jobs.yaml".to_string(),
            cache_expiration: Duration::from_secs(30 * 24 * 60 * 60),
            opensubtitles_api_key: None,
            tmdb_api_key: None,
            user_agent: format!("subtitle-scheduler v{}", env!("CARGO_PKG_VERSION")),
        }
    }
}
