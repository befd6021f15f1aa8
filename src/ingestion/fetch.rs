//! Fetch functions - retrieve search result pages from the listings endpoint

use crate::ingestion::error::{IngestionError, Result};
use crate::ingestion::parse::parse_search_response;
use crate::ingestion::types::{PageCursor, SearchPage, SearchQuery};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::json;
use tracing::{debug, info};

pub const DEFAULT_SEARCH_URL: &str = "https://www.zillow.com/search/GetSearchPageState.htm";

/// Anything that can return one page of search results
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, query: &SearchQuery, cursor: &PageCursor) -> Result<SearchPage>;
}

/// The site's search endpoint over HTTP
pub struct SearchClient {
    client: Client,
    base_url: String,
}

impl SearchClient {
    /// `client` should already carry the browser header set (see `utils::search_headers`)
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PageSource for SearchClient {
    async fn fetch_page(&self, query: &SearchQuery, cursor: &PageCursor) -> Result<SearchPage> {
        let url = build_search_url(&self.base_url, query, cursor.current_page)?;
        info!("Fetching page {} of {}", cursor.current_page, query.search_term());
        debug!("Reaching {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        info!("Search endpoint responded {}", status);

        if !status.is_success() {
            return Err(IngestionError::Transport(format!(
                "search request failed: {}",
                status
            )));
        }

        let body = response.text().await?;
        let page = parse_search_response(&body)?;
        info!("Total pages for this search: {}", page.total_pages);

        Ok(page)
    }
}

/// The `searchQueryState` parameter: pagination, bounds and region selector
pub fn search_query_state(query: &SearchQuery, page: u32) -> serde_json::Value {
    json!({
        "pagination": { "currentPage": page },
        "usersSearchTerm": query.search_term(),
        "mapBounds": query.bounds,
        "regionSelection": [query.region],
        "isMapVisible": true,
        "filterState": {
            "sortSelection": { "value": "globalrelevanceex" },
            "isAllHomes": { "value": true }
        },
        "isListVisible": true
    })
}

/// Full request URL for `page` of `query`
pub fn build_search_url(base_url: &str, query: &SearchQuery, page: u32) -> Result<Url> {
    let state = search_query_state(query, page).to_string();
    let wants = json!({ "cat1": ["listResults", "mapResults"], "cat2": ["total"] }).to_string();

    Url::parse_with_params(
        base_url,
        &[
            ("searchQueryState", state.as_str()),
            ("wants", wants.as_str()),
            ("requestId", "4"),
        ],
    )
    .map_err(|e| IngestionError::Config(format!("invalid search URL {}: {}", base_url, e)))
}
