//! Extraction run - drives pagination over one search query

use crate::ingestion::error::Result;
use crate::ingestion::fetch::PageSource;
use crate::ingestion::parse::project;
use crate::ingestion::types::{ListingRecord, PageCursor, SearchQuery};
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;

/// Records of a finished run plus the number of pages fetched
#[derive(Debug, Clone)]
pub struct Extraction {
    pub records: Vec<ListingRecord>,
    pub pages_fetched: u32,
}

/// Fetch every page of `query` and project its listings, in page order then
/// in-page order. Pauses `page_delay` between fetches.
///
/// Any fetch error aborts the whole run; nothing fetched so far is returned.
pub async fn run_search<S: PageSource + ?Sized>(
    source: &S,
    query: &SearchQuery,
    page_delay: Duration,
) -> Result<Extraction> {
    let mut cursor = PageCursor::start();
    let mut records = Vec::new();
    let mut pages_fetched = 0;

    while cursor.has_more() {
        let page = source.fetch_page(query, &cursor).await?;
        pages_fetched += 1;
        cursor.observe_total(page.total_pages);

        let page_records: Vec<ListingRecord> = page
            .listings
            .iter()
            .map(|raw| project(raw, query, cursor.current_page))
            .collect();
        info!(
            "Page {}/{}: {} listings",
            cursor.current_page,
            cursor.total_pages,
            page_records.len()
        );
        records.extend(page_records);

        cursor.advance();
        if cursor.has_more() {
            sleep(page_delay).await;
        }
    }

    Ok(Extraction {
        records,
        pages_fetched,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::error::IngestionError;
    use crate::ingestion::parse::parse_search_response;
    use crate::ingestion::testing::{page, ScriptedSource};
    use crate::ingestion::types::SearchPage;
    use serde_json::json;

    #[tokio::test]
    async fn test_stamford_scenario() {
        let page_one = SearchPage {
            listings: vec![
                json!({
                    "zpid": "1",
                    "beds": 3,
                    "latLong": { "latitude": 41.0, "longitude": -73.5 }
                }),
                json!({ "zpid": "2", "price": "$610,000" }),
            ],
            total_pages: 2,
        };
        let source = ScriptedSource::new(vec![Ok(page_one), page(&["3"], 2)]);
        let query = SearchQuery::stamford_ct();

        let extraction = run_search(&source, &query, Duration::ZERO).await.unwrap();
        let records = extraction.records;

        assert_eq!(records.len(), 3);
        assert_eq!(extraction.pages_fetched, 2);
        assert_eq!(records[0].price, None);
        assert_eq!(records[0].zpid.as_deref(), Some("1"));
        assert_eq!(records[1].price.as_deref(), Some("$610,000"));
        assert!(records.iter().all(|r| r.state == "CT"));
        assert_eq!(
            records.iter().map(|r| r.page).collect::<Vec<_>>(),
            vec![1, 1, 2]
        );
    }

    #[tokio::test]
    async fn test_records_follow_page_then_listing_order() {
        let source = ScriptedSource::new(vec![
            page(&["a", "b"], 3),
            page(&["c"], 3),
            page(&["d", "e", "f"], 3),
        ]);

        let extraction = run_search(&source, &SearchQuery::stamford_ct(), Duration::ZERO)
            .await
            .unwrap();

        let zpids: Vec<_> = extraction
            .records
            .iter()
            .map(|r| r.zpid.clone().unwrap())
            .collect();
        assert_eq!(zpids, vec!["a", "b", "c", "d", "e", "f"]);
        assert_eq!(source.requested(), vec![1, 2, 3]);
        assert_eq!(
            extraction.records.iter().map(|r| r.page).collect::<Vec<_>>(),
            vec![1, 1, 2, 3, 3, 3]
        );
    }

    #[tokio::test]
    async fn test_total_revised_upward() {
        // First response says 2 pages, the second says 3
        let source = ScriptedSource::new(vec![
            page(&["a"], 2),
            page(&["b"], 3),
            page(&["c"], 3),
        ]);

        let extraction = run_search(&source, &SearchQuery::stamford_ct(), Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(source.requested(), vec![1, 2, 3]);
        assert_eq!(extraction.records.len(), 3);
    }

    #[tokio::test]
    async fn test_total_revised_downward() {
        let source = ScriptedSource::new(vec![page(&["a"], 5), page(&["b"], 2)]);

        let extraction = run_search(&source, &SearchQuery::stamford_ct(), Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(source.requested(), vec![1, 2]);
        assert_eq!(extraction.pages_fetched, 2);
    }

    #[tokio::test]
    async fn test_zero_total_stops_after_first_fetch() {
        let source = ScriptedSource::new(vec![page(&[], 0)]);

        let extraction = run_search(&source, &SearchQuery::stamford_ct(), Duration::ZERO)
            .await
            .unwrap();

        assert!(extraction.records.is_empty());
        assert_eq!(source.requested(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_page_fetches_once_without_delay() {
        let source = ScriptedSource::new(vec![page(&["a", "b"], 1)]);
        let started = tokio::time::Instant::now();

        run_search(&source, &SearchQuery::stamford_ct(), Duration::from_secs(3))
            .await
            .unwrap();

        assert_eq!(source.requested(), vec![1]);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_between_pages() {
        let source = ScriptedSource::new(vec![
            page(&["a"], 3),
            page(&["b"], 3),
            page(&["c"], 3),
        ]);
        let started = tokio::time::Instant::now();

        run_search(&source, &SearchQuery::stamford_ct(), Duration::from_secs(3))
            .await
            .unwrap();

        // Two gaps between three fetches, none after the last
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(6) && elapsed < Duration::from_secs(9));
    }

    #[tokio::test]
    async fn test_fetch_error_aborts_run() {
        let source = ScriptedSource::new(vec![
            page(&["a"], 3),
            Err(IngestionError::Transport("connection reset".to_string())),
            page(&["c"], 3),
        ]);

        let err = run_search(&source, &SearchQuery::stamford_ct(), Duration::ZERO)
            .await
            .unwrap_err();

        assert!(matches!(err, IngestionError::Transport(_)));
        assert_eq!(source.requested(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_non_json_body_fails_with_format_error() {
        let source = ScriptedSource::new(vec![parse_search_response("<!doctype html>")]);

        let err = run_search(&source, &SearchQuery::stamford_ct(), Duration::ZERO)
            .await
            .unwrap_err();

        assert!(matches!(err, IngestionError::Format(_)));
    }
}
