//! Pipeline run - fetch, write, upload, then clean up one snapshot

use crate::ingestion::error::Result;
use crate::ingestion::fetch::PageSource;
use crate::ingestion::search::run_search;
use crate::ingestion::types::{RunStats, SearchQuery};
use crate::ingestion::upload::{object_key, upload_file, UploadTarget};
use crate::ingestion::utils::remove_local_file;
use crate::ingestion::write::write_csv;
use chrono::NaiveDate;
use reqwest::Client;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Everything a run needs besides the page source and the upload client
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub output_dir: PathBuf,
    pub page_delay: Duration,
    pub object_prefix: String,
    pub upload: UploadTarget,
    /// Date stamped into the file name
    pub run_date: NaiveDate,
}

/// Run all four steps for `query`.
///
/// A failed step stops the run. Nothing is written when extraction fails, and
/// the local file is only removed once the upload is confirmed.
pub async fn run_pipeline<S: PageSource + ?Sized>(
    source: &S,
    upload_client: &Client,
    query: &SearchQuery,
    settings: &PipelineSettings,
) -> Result<RunStats> {
    info!("=== Listings Pipeline: {} ===", query.search_term());
    settings.upload.validate()?;

    let file_name = query.output_file_name(settings.run_date);
    let local_path = settings.output_dir.join(&file_name);

    // Step 1: Fetch and project every page
    info!("Step 1/4: Fetching listings...");
    let extraction = run_search(source, query, settings.page_delay).await?;
    info!(
        "✓ Fetched {} records from {} pages",
        extraction.records.len(),
        extraction.pages_fetched
    );

    // Step 2: Write CSV snapshot
    info!("Step 2/4: Writing {:?}...", local_path);
    let rows = write_csv(&extraction.records, &local_path)?;
    info!("✓ Wrote {} rows", rows);

    // Step 3: Upload
    info!("Step 3/4: Uploading...");
    let object_name = object_key(&settings.object_prefix, &file_name);
    let bytes_uploaded =
        upload_file(upload_client, &settings.upload, &object_name, &local_path).await?;
    info!("✓ Upload complete");

    // Step 4: Cleanup
    info!("Step 4/4: Removing local file...");
    remove_local_file(&local_path).await?;
    info!("✓ Cleanup complete");

    Ok(RunStats {
        pages_fetched: extraction.pages_fetched,
        records: extraction.records.len(),
        missing_fields: extraction.records.iter().map(|r| r.missing_fields()).sum(),
        bytes_uploaded,
    })
}
