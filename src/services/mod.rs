//! Domain services and external integrations

pub mod cache;
pub mod catalog;
pub mod convert;
pub mod dedup;
pub mod filename_parser;
pub mod language;
pub mod lock;
pub mod pipeline;
pub mod providers;
pub mod rate_limiter;
pub mod refiner;
pub mod report;
pub mod scanner;
pub mod score;
pub mod storage;
pub mod tmdb;
pub mod tvmaze;
pub mod video;

pub use cache::CacheRegion;
pub use catalog::{CatalogError, MediaCatalog, PlexCatalog};
pub use convert::{CueConverter, SubtitleConverter, SubtitleFormat};
pub use dedup::DuplicateFilter;
pub use language::Language;
pub use lock::CacheLock;
pub use pipeline::{AcquisitionPipeline, ScanError, ScanRequest, SurveyRequest};
pub use providers::{ProviderConfigs, ProviderCredentials, ProviderRegistry, SubtitleCandidate, SubtitleProvider};
pub use rate_limiter::RateLimitedClient;
pub use refiner::{MetadataRefiner, Refiner};
pub use report::RunReport;
pub use tmdb::TmdbClient;
pub use tvmaze::TvMazeClient;
pub use video::{Video, VideoKind};
