//! Parse functions - decode search responses and project listings into ListingRecord structs

use crate::ingestion::error::{FieldReadError, IngestionError, Result};
use crate::ingestion::types::{ListingRecord, RawListing, SearchPage, SearchQuery};
use serde_json::Value;
use tracing::{debug, warn};

/// Decode a search response body into its listings and total page count.
/// Listings live at `cat1.searchResults.listResults`, the page count at
/// `cat1.searchList.totalPages`.
pub fn parse_search_response(body: &str) -> Result<SearchPage> {
    let data: Value = serde_json::from_str(body)
        .map_err(|e| IngestionError::Format(format!("response is not valid JSON: {}", e)))?;

    let listings = data
        .pointer("/cat1/searchResults/listResults")
        .ok_or_else(|| {
            IngestionError::Format("missing cat1.searchResults.listResults".to_string())
        })?
        .as_array()
        .ok_or_else(|| {
            IngestionError::Format("cat1.searchResults.listResults is not an array".to_string())
        })?
        .clone();

    let total_pages = data
        .pointer("/cat1/searchList/totalPages")
        .ok_or_else(|| IngestionError::Format("missing cat1.searchList.totalPages".to_string()))?
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| {
            IngestionError::Format(
                "cat1.searchList.totalPages is not a non-negative integer".to_string(),
            )
        })?;

    Ok(SearchPage {
        listings,
        total_pages,
    })
}

/// Project a raw listing into a ListingRecord.
/// Every field is decoded on its own; a field that cannot be read is left
/// missing and the rest of the record is still populated.
pub fn project(raw: &RawListing, query: &SearchQuery, page: u32) -> ListingRecord {
    let field = |name: &'static str| recover(name, read_field(raw, name));
    let (latitude, longitude) = match read_lat_long(raw) {
        Ok(coords) => coords,
        Err(e) => {
            warn!("Error reading field latLong: {}", e);
            (None, None)
        }
    };

    ListingRecord {
        zpid: field("zpid"),
        price: field("price"),
        beds: field("beds"),
        baths: field("baths"),
        area: field("area"),
        latitude,
        longitude,
        status_type: field("statusType"),
        city: query.city.clone(),
        state: query.state.clone(),
        page,
    }
}

fn recover(
    name: &str,
    result: std::result::Result<Option<String>, FieldReadError>,
) -> Option<String> {
    match result {
        Ok(Some(value)) => Some(value),
        Ok(None) => {
            debug!("Field {} absent", name);
            None
        }
        Err(e) => {
            warn!("Error reading field {}: {}", name, e);
            None
        }
    }
}

/// Read a top-level scalar field.
/// `Ok(None)` when the field is absent or null, `Err` when it is present but
/// not a scalar (or the listing itself is not an object).
pub fn read_field(
    raw: &RawListing,
    name: &'static str,
) -> std::result::Result<Option<String>, FieldReadError> {
    let object = raw.as_object().ok_or(FieldReadError::NotAnObject)?;
    match object.get(name) {
        None => Ok(None),
        Some(value) => scalar_text(name, value),
    }
}

/// Read latitude and longitude together from the `latLong` sub-object.
/// An absent or null `latLong` yields both missing.
pub fn read_lat_long(
    raw: &RawListing,
) -> std::result::Result<(Option<String>, Option<String>), FieldReadError> {
    let object = raw.as_object().ok_or(FieldReadError::NotAnObject)?;
    let lat_long = match object.get("latLong") {
        None | Some(Value::Null) => return Ok((None, None)),
        Some(Value::Object(inner)) => inner,
        Some(other) => {
            return Err(FieldReadError::UnexpectedShape {
                field: "latLong",
                found: kind(other).to_string(),
            })
        }
    };

    let latitude = match lat_long.get("latitude") {
        None => None,
        Some(v) => scalar_text("latitude", v)?,
    };
    let longitude = match lat_long.get("longitude") {
        None => None,
        Some(v) => scalar_text("longitude", v)?,
    };

    Ok((latitude, longitude))
}

/// Render a JSON scalar as cell text; strings are taken verbatim
fn scalar_text(
    field: &'static str,
    value: &Value,
) -> std::result::Result<Option<String>, FieldReadError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        other => Err(FieldReadError::UnexpectedShape {
            field,
            found: kind(other).to_string(),
        }),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
