//! Core data types for the ingestion pipeline
//! Pure data structures with no I/O

use chrono::NaiveDate;
use serde::Serialize;

/// One listing exactly as the search endpoint returned it
pub type RawListing = serde_json::Value;

/// Parameters of one geographic search, fixed for the whole run
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub city: String,
    pub state: String,
    pub bounds: MapBounds,
    pub region: RegionSelection,
}

/// Bounding box in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MapBounds {
    pub west: f64,
    pub east: f64,
    pub south: f64,
    pub north: f64,
}

/// (regionId, regionType) pair identifying the searched area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionSelection {
    pub region_id: u64,
    pub region_type: u32,
}

impl SearchQuery {
    /// Stamford, CT - the query the daily job runs
    pub fn stamford_ct() -> Self {
        SearchQuery {
            city: "Stamford".to_string(),
            state: "CT".to_string(),
            bounds: MapBounds {
                west: -73.67487426538085,
                east: -73.45411773461913,
                south: 40.9626044146077,
                north: 41.180536765064744,
            },
            region: RegionSelection {
                region_id: 27239,
                region_type: 6,
            },
        }
    }

    /// Search term as typed into the site's search box, e.g. "Stamford,CT"
    pub fn search_term(&self) -> String {
        format!("{},{}", self.city, self.state)
    }

    /// Local file name for a run on `date`, e.g. `stamford_ct_zillow_2024-01-09.csv`
    pub fn output_file_name(&self, date: NaiveDate) -> String {
        let city = self.city.trim().to_lowercase().replace(' ', "_");
        let state = self.state.trim().to_lowercase();
        format!("{}_{}_zillow_{}.csv", city, state, date.format("%Y-%m-%d"))
    }
}

/// Pagination state threaded through one extraction run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub current_page: u32,
    pub total_pages: u32,
}

impl PageCursor {
    /// Page 1 of an unknown total, treated as 1 until the first response
    pub fn start() -> Self {
        PageCursor {
            current_page: 1,
            total_pages: 1,
        }
    }

    pub fn has_more(&self) -> bool {
        self.current_page <= self.total_pages
    }

    /// Record the total reported by the latest response; it may grow or shrink
    pub fn observe_total(&mut self, total_pages: u32) {
        self.total_pages = total_pages;
    }

    pub fn advance(&mut self) {
        self.current_page += 1;
    }
}

/// Listings and page count from a single search response
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage {
    pub listings: Vec<RawListing>,
    pub total_pages: u32,
}

/// Projected output row - one per raw listing.
/// `None` marks a field that was absent or unreadable on the source listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingRecord {
    pub zpid: Option<String>,
    pub price: Option<String>,
    pub beds: Option<String>,
    pub baths: Option<String>,
    pub area: Option<String>,
    pub latitude: Option<String>,
    pub longitude: Option<String>,
    pub status_type: Option<String>,
    pub city: String,
    pub state: String,
    pub page: u32,
}

impl ListingRecord {
    /// Column names in output order, excluding the row index
    pub const COLUMNS: [&'static str; 11] = [
        "zpid",
        "price",
        "beds",
        "baths",
        "area",
        "latitude",
        "longitude",
        "statusType",
        "city",
        "state",
        "page",
    ];

    /// Cell values in `COLUMNS` order; missing fields become empty cells
    pub fn cells(&self) -> [String; 11] {
        let opt = |v: &Option<String>| v.clone().unwrap_or_default();
        [
            opt(&self.zpid),
            opt(&self.price),
            opt(&self.beds),
            opt(&self.baths),
            opt(&self.area),
            opt(&self.latitude),
            opt(&self.longitude),
            opt(&self.status_type),
            self.city.clone(),
            self.state.clone(),
            self.page.to_string(),
        ]
    }

    /// Number of projected fields that came back missing
    pub fn missing_fields(&self) -> usize {
        [
            &self.zpid,
            &self.price,
            &self.beds,
            &self.baths,
            &self.area,
            &self.latitude,
            &self.longitude,
            &self.status_type,
        ]
        .iter()
        .filter(|v| v.is_none())
        .count()
    }
}

/// Outcome of one full pipeline run
#[derive(Debug, Default, Clone)]
pub struct RunStats {
    pub pages_fetched: u32,
    pub records: usize,
    pub missing_fields: usize,
    pub bytes_uploaded: u64,
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pages: {}, records: {}, missing fields: {}, uploaded: {} bytes",
            self.pages_fetched, self.records, self.missing_fields, self.bytes_uploaded
        )
    }
}
