//! Listings pipeline orchestrator - runs fetch, write, upload, cleanup

use anyhow::{Context, Result};
use chrono::Utc;
use listings_pipeline::ingestion::{
    fetch::{SearchClient, DEFAULT_SEARCH_URL},
    pipeline::{self, PipelineSettings},
    upload::{build_upload_client, UploadTarget, DEFAULT_CHUNK_SIZE, DEFAULT_UPLOAD_URL},
    utils::{self, DEFAULT_USER_AGENT},
    IngestionError, RunStats, SearchQuery,
};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env first so RUST_LOG from it reaches the filter
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env()?;
    info!("Configuration loaded");

    let mode = env::args().nth(1).unwrap_or_else(|| "run".to_string());
    match mode.as_str() {
        "run" => {
            let stats = run_with_retries(&config, &SearchQuery::stamford_ct()).await?;
            info!("✓ Pipeline completed: {}", stats);
            Ok(())
        }
        "schedule" => schedule(config).await,
        other => Err(anyhow::anyhow!(
            "Unknown mode: {} (expected `run` or `schedule`)",
            other
        )),
    }
}

/// Run the pipeline on `config.schedule` until Ctrl-C.
/// A trigger that fires while a run is still in progress is skipped.
async fn schedule(config: Config) -> Result<()> {
    let scheduler = JobScheduler::new().await?;
    let config = Arc::new(config);
    let active = Arc::new(Mutex::new(()));

    let cron = config.schedule.clone();
    let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
        let config = config.clone();
        let active = active.clone();
        Box::pin(async move {
            let Ok(_guard) = active.try_lock() else {
                warn!("Previous run still active, skipping this trigger");
                return;
            };

            match run_with_retries(&config, &SearchQuery::stamford_ct()).await {
                Ok(stats) => info!("✓ Scheduled run completed: {}", stats),
                Err(e) => error!("✗ Scheduled run failed: {:#}", e),
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;
    info!("Scheduler started ({})", cron);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down scheduler");
    Ok(())
}

/// Run the whole pipeline, retrying from scratch up to `config.retries` times
async fn run_with_retries(config: &Config, query: &SearchQuery) -> Result<RunStats> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match run_pipeline(config, query).await {
            Ok(stats) => return Ok(stats),
            Err(e) if attempt <= config.retries => {
                warn!("Attempt {} failed: {:#}, retrying from page 1", attempt, e);
                tokio::time::sleep(config.retry_delay).await;
            }
            Err(e) => {
                error!("Attempt {} failed: {:#}, giving up", attempt, e);
                return Err(e);
            }
        }
    }
}

/// Build the HTTP clients for one attempt and run every step
async fn run_pipeline(config: &Config, query: &SearchQuery) -> Result<RunStats> {
    let settings = PipelineSettings {
        output_dir: config.output_dir.clone(),
        page_delay: config.page_delay,
        object_prefix: config.object_prefix.clone(),
        upload: config.upload_target()?,
        run_date: Utc::now().date_naive(),
    };

    let headers = utils::search_headers(&config.user_agent, config.cookie.as_deref())?;
    let client = utils::build_client(headers, config.http_timeout)?;
    let source = SearchClient::new(client, config.search_url.clone());
    let upload_client = build_upload_client(config.http_timeout)?;

    pipeline::run_pipeline(&source, &upload_client, query, &settings)
        .await
        .context("Pipeline run failed")
}

/// Configuration loaded from environment variables
#[derive(Debug, Clone)]
struct Config {
    search_url: String,
    cookie: Option<String>,
    user_agent: String,
    page_delay: Duration,
    http_timeout: Duration,
    output_dir: PathBuf,
    gcs_bucket: Option<String>,
    gcs_access_token: Option<String>,
    gcs_upload_url: String,
    object_prefix: String,
    upload_chunk_bytes: usize,
    retries: u32,
    retry_delay: Duration,
    schedule: String,
}

impl Config {
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let number = |key: &str, default: u64| -> Result<u64> {
            match lookup(key) {
                Some(v) => v
                    .trim()
                    .parse()
                    .with_context(|| format!("{} must be a non-negative integer", key)),
                None => Ok(default),
            }
        };

        Ok(Config {
            search_url: lookup("SEARCH_URL").unwrap_or_else(|| DEFAULT_SEARCH_URL.to_string()),
            cookie: lookup("SEARCH_COOKIE").filter(|c| !c.trim().is_empty()),
            user_agent: lookup("SEARCH_USER_AGENT")
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            page_delay: Duration::from_secs(number("PAGE_DELAY_SECS", 3)?),
            http_timeout: Duration::from_secs(number("HTTP_TIMEOUT_SECS", 60)?),
            output_dir: lookup("OUTPUT_DIR")
                .unwrap_or_else(|| "/tmp/listings".to_string())
                .into(),
            gcs_bucket: lookup("GCS_BUCKET"),
            gcs_access_token: lookup("GCS_ACCESS_TOKEN"),
            gcs_upload_url: lookup("GCS_UPLOAD_URL")
                .unwrap_or_else(|| DEFAULT_UPLOAD_URL.to_string()),
            object_prefix: lookup("GCS_OBJECT_PREFIX").unwrap_or_else(|| "real_estate".to_string()),
            upload_chunk_bytes: number("UPLOAD_CHUNK_BYTES", DEFAULT_CHUNK_SIZE as u64)? as usize,
            retries: number("RUN_RETRIES", 1)? as u32,
            retry_delay: Duration::from_secs(number("RUN_RETRY_DELAY_SECS", 300)?),
            schedule: lookup("RUN_SCHEDULE").unwrap_or_else(|| "0 0 0 * * *".to_string()),
        })
    }

    fn upload_target(&self) -> Result<UploadTarget, IngestionError> {
        let bucket = self
            .gcs_bucket
            .clone()
            .ok_or_else(|| IngestionError::Config("GCS_BUCKET must be set".to_string()))?;
        let access_token = self
            .gcs_access_token
            .clone()
            .ok_or_else(|| IngestionError::Config("GCS_ACCESS_TOKEN must be set".to_string()))?;

        let target = UploadTarget {
            api_base: self.gcs_upload_url.clone(),
            bucket,
            access_token,
            chunk_size: self.upload_chunk_bytes,
        };
        target.validate()?;
        Ok(target)
    }
}
