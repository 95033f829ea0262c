//! Subtitle scheduler - runs subtitle acquisition jobs on a cron schedule

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use subtitle_scheduler::cli::CliOptions;
use subtitle_scheduler::config::Config;
use subtitle_scheduler::db::Database;
use subtitle_scheduler::jobs::{self, JobContext, JobRunner};
use subtitle_scheduler::services::{
    AcquisitionPipeline, CacheRegion, CueConverter, MetadataRefiner, ProviderRegistry,
    RateLimitedClient, TmdbClient, TvMazeClient,
};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "subtitle_scheduler=debug,tokio_cron_scheduler=info".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let options = CliOptions::from_args();
    if options.list {
        println!("{}", serde_json::to_string_pretty(&jobs::list_jobs())?);
        return Ok(());
    }

    let config = Arc::new(Config::from_env()?);
    tracing::info!("Configuration loaded");

    let db = Database::connect(&config.database_path, config.database_max_connections).await?;
    tracing::info!(path = %config.database_path, "Database connected");

    let cache = Arc::new(CacheRegion::new(db.clone(), config.cache_expiration));
    match cache.purge_expired().await {
        Ok(purged) if purged > 0 => tracing::info!(purged, "Purged expired cache entries"),
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Failed to purge expired cache entries"),
    }

    let tvmaze = TvMazeClient::new(RateLimitedClient::for_tvmaze(&config.user_agent)?);
    let tmdb = match &config.tmdb_api_key {
        Some(key) => Some(TmdbClient::new(
            RateLimitedClient::for_tmdb(&config.user_agent)?,
            key.clone(),
        )),
        None => {
            tracing::info!("TMDB_API_KEY not set, movie refinement disabled");
            None
        }
    };
    let refiner = Arc::new(MetadataRefiner::new(cache, tvmaze, tmdb));
    let registry = Arc::new(ProviderRegistry::with_defaults(
        config.opensubtitles_api_key.clone(),
        config.user_agent.clone(),
    ));
    let pipeline = Arc::new(AcquisitionPipeline::new(
        db.clone(),
        refiner,
        registry,
        Arc::new(CueConverter::new()),
    ));

    let runner = JobRunner::new(Arc::new(JobContext {
        db: db.clone(),
        pipeline,
        config: config.clone(),
    }));

    let jobs_file = PathBuf::from(options.jobs_file.as_deref().unwrap_or(&config.jobs_file));
    let definitions = jobs::load_definitions(&jobs_file)?;
    tracing::info!(count = definitions.len(), file = %jobs_file.display(), "Job definitions loaded");

    if let Some(name) = options.run_job {
        let definition = definitions
            .into_iter()
            .find(|d| d.name == name)
            .with_context(|| format!("No job named '{}' in {}", name, jobs_file.display()))?;
        let job = jobs::job_for(definition.job);
        let result = runner
            .execute(&definition.name, job.as_ref(), &definition.arguments)
            .await;
        db.close().await;
        println!("{}", serde_json::to_string_pretty(&result?)?);
        return Ok(());
    }

    let mut scheduler = jobs::start_scheduler(runner, definitions).await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");

    scheduler.shutdown().await?;
    db.close().await;
    Ok(())
}
