//! Utility functions for common operations

use crate::ingestion::error::{IngestionError, Result};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, COOKIE, PRAGMA,
    USER_AGENT,
};
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/107.0.0.0 Safari/537.36";

/// Browser-like header set the search endpoint expects from a same-origin XHR
pub fn search_headers(user_agent: &str, cookie: Option<&str>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.8"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(
        HeaderName::from_static("sec-fetch-dest"),
        HeaderValue::from_static("empty"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-mode"),
        HeaderValue::from_static("cors"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-site"),
        HeaderValue::from_static("same-origin"),
    );
    headers.insert(HeaderName::from_static("sec-gpc"), HeaderValue::from_static("1"));

    let agent = HeaderValue::from_str(user_agent)
        .map_err(|e| IngestionError::Config(format!("invalid user agent: {}", e)))?;
    headers.insert(USER_AGENT, agent);

    if let Some(cookie) = cookie {
        let mut value = HeaderValue::from_str(cookie)
            .map_err(|e| IngestionError::Config(format!("invalid session cookie: {}", e)))?;
        value.set_sensitive(true);
        headers.insert(COOKIE, value);
    }

    Ok(headers)
}

/// Build an HTTP client with the given default headers and timeout
pub fn build_client(headers: HeaderMap, timeout: Duration) -> Result<Client> {
    Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(IngestionError::from)
}

/// Delete a local file once it is no longer needed
pub async fn remove_local_file(path: &Path) -> Result<()> {
    tokio::fs::remove_file(path)
        .await
        .map_err(|e| IngestionError::io(path, e))?;
    info!("Removed {:?}", path);
    Ok(())
}
