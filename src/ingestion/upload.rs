//! Upload functions - push a finished snapshot to Cloud Storage
//!
//! Uses the JSON API's resumable protocol so large files go up in fixed-size
//! chunks instead of one long request, which times out on slow links.

use crate::ingestion::error::{IngestionError, Result};
use bytes::Bytes;
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode, Url};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_UPLOAD_URL: &str = "https://storage.googleapis.com/upload/storage/v1";

/// Chunks must be a multiple of 256 KiB, except the last one
pub const CHUNK_ALIGNMENT: usize = 256 * 1024;
pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Resends allowed at an offset the server has not moved past
pub const MAX_STALLED_CHUNKS: u32 = 3;

/// Where and how to upload
#[derive(Debug, Clone)]
pub struct UploadTarget {
    pub api_base: String,
    pub bucket: String,
    pub access_token: String,
    pub chunk_size: usize,
}

impl UploadTarget {
    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(IngestionError::Config("bucket name is empty".to_string()));
        }
        if self.chunk_size == 0 || self.chunk_size % CHUNK_ALIGNMENT != 0 {
            return Err(IngestionError::Config(format!(
                "upload chunk size {} is not a positive multiple of {}",
                self.chunk_size, CHUNK_ALIGNMENT
            )));
        }
        Ok(())
    }
}

/// Object key for a local file, e.g. `real_estate/stamford_ct_zillow_2024-01-09.csv`
pub fn object_key(prefix: &str, file_name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        file_name.to_string()
    } else {
        format!("{}/{}", prefix, file_name)
    }
}

/// Client for upload sessions. A `308` is the protocol's "resume incomplete",
/// so redirects must not be followed.
pub fn build_upload_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .redirect(Policy::none())
        .build()
        .map_err(IngestionError::from)
}

/// `Content-Range` value for one chunk of a `total`-byte upload
pub fn content_range(start: usize, end: usize, total: usize) -> String {
    format!("bytes {}-{}/{}", start, end, total)
}

/// Offset to resume from after a `308`: the server's `Range: bytes=0-N` means
/// N + 1 bytes are stored; no `Range` means nothing is.
pub fn resume_offset(headers: &HeaderMap) -> Result<usize> {
    let Some(value) = headers.get(RANGE) else {
        return Ok(0);
    };
    let text = value
        .to_str()
        .map_err(|_| IngestionError::Upload("unreadable Range header".to_string()))?;

    text.trim()
        .strip_prefix("bytes=0-")
        .and_then(|end| end.parse::<usize>().ok())
        .map(|end| end + 1)
        .ok_or_else(|| IngestionError::Upload(format!("unexpected Range header: {}", text)))
}

/// Upload `local_file` as `object_name`. Returns the number of bytes sent.
/// Each chunk resumes from what the server reports as stored. The upload either
/// completes or fails; a partial session is abandoned.
pub async fn upload_file(
    client: &Client,
    target: &UploadTarget,
    object_name: &str,
    local_file: &Path,
) -> Result<u64> {
    target.validate()?;

    let data = tokio::fs::read(local_file)
        .await
        .map_err(|e| IngestionError::io(local_file, e))?;
    let total = data.len();
    info!(
        "Uploading {:?} ({} bytes) to gs://{}/{}",
        local_file, total, target.bucket, object_name
    );

    let session = start_session(client, target, object_name, total).await?;
    let data = Bytes::from(data);

    if total == 0 {
        finalize(client, &session, 0).await?;
        return Ok(0);
    }

    let mut offset = 0;
    let mut stalled = 0;
    while offset < total {
        let end = (offset + target.chunk_size).min(total) - 1;
        let response = client
            .put(session.clone())
            .header(CONTENT_RANGE, content_range(offset, end, total))
            .body(data.slice(offset..=end))
            .send()
            .await?;
        let status = response.status();
        debug!("Chunk {}-{} responded {}", offset, end, status);

        if status == StatusCode::OK || status == StatusCode::CREATED {
            info!("Upload complete: gs://{}/{}", target.bucket, object_name);
            return Ok(total as u64);
        }
        if status != StatusCode::PERMANENT_REDIRECT {
            return Err(IngestionError::Upload(format!(
                "chunk {}-{} rejected: {}",
                offset, end, status
            )));
        }

        let next = resume_offset(response.headers())?;
        if next <= offset {
            stalled += 1;
            if stalled > MAX_STALLED_CHUNKS {
                return Err(IngestionError::Upload(format!(
                    "no progress past byte {} after {} attempts",
                    offset, stalled
                )));
            }
            warn!("Server kept {} bytes, resending from there", next);
        } else {
            stalled = 0;
            if next <= end {
                warn!("Server kept bytes up to {} of {}, resending the rest", next, end);
            }
        }
        offset = next;
    }

    // Every byte is stored but the server did not finish the object
    finalize(client, &session, total).await?;
    info!("Upload complete: gs://{}/{}", target.bucket, object_name);
    Ok(total as u64)
}

/// Ask the server to finish an upload whose bytes are all stored
async fn finalize(client: &Client, session: &Url, total: usize) -> Result<()> {
    let response = client
        .put(session.clone())
        .header(CONTENT_RANGE, format!("bytes */{}", total))
        .body(Bytes::new())
        .send()
        .await?;
    expect_complete(response.status())
}

/// Open a resumable session; the session URI comes back in `Location`
async fn start_session(
    client: &Client,
    target: &UploadTarget,
    object_name: &str,
    total: usize,
) -> Result<Url> {
    let endpoint = format!(
        "{}/b/{}/o",
        target.api_base.trim_end_matches('/'),
        target.bucket
    );
    let url = Url::parse_with_params(
        &endpoint,
        &[("uploadType", "resumable"), ("name", object_name)],
    )
    .map_err(|e| IngestionError::Config(format!("invalid upload URL {}: {}", endpoint, e)))?;

    let response = client
        .post(url)
        .header(AUTHORIZATION, format!("Bearer {}", target.access_token))
        .header(CONTENT_TYPE, "application/json; charset=UTF-8")
        .header("X-Upload-Content-Type", "text/csv")
        .header("X-Upload-Content-Length", total)
        .body("{}")
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(IngestionError::Upload(format!(
            "could not start upload session: {} {}",
            status, body
        )));
    }

    let location = response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            IngestionError::Upload("upload session has no Location header".to_string())
        })?;

    Url::parse(location)
        .map_err(|e| IngestionError::Upload(format!("invalid session URI {}: {}", location, e)))
}

fn expect_complete(status: StatusCode) -> Result<()> {
    if status == StatusCode::OK || status == StatusCode::CREATED {
        Ok(())
    } else {
        Err(IngestionError::Upload(format!(
            "upload not finalized: {}",
            status
        )))
    }
}
