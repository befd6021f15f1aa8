//! Write functions - persist listing records as a CSV snapshot

use crate::ingestion::error::{IngestionError, Result};
use crate::ingestion::types::ListingRecord;
use std::path::Path;
use tracing::info;

/// Write records to `path` as CSV, one row per record with a leading row index.
/// Any existing file at `path` is overwritten. Returns the number of rows written.
pub fn write_csv(records: &[ListingRecord], path: &Path) -> Result<usize> {
    info!("Writing {} listing records to {:?}", records.len(), path);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| IngestionError::io(parent, e))?;
    }

    let mut writer = csv::Writer::from_path(path).map_err(|e| csv_error(path, e))?;

    let mut header = vec![""];
    header.extend(ListingRecord::COLUMNS);
    writer.write_record(&header).map_err(|e| csv_error(path, e))?;

    for (idx, record) in records.iter().enumerate() {
        let index = idx.to_string();
        let cells = record.cells();
        writer
            .write_record(std::iter::once(index.as_str()).chain(cells.iter().map(String::as_str)))
            .map_err(|e| csv_error(path, e))?;
    }

    writer.flush().map_err(|e| IngestionError::io(path, e))?;

    info!("Write complete: {} rows", records.len());
    Ok(records.len())
}

fn csv_error(path: &Path, err: csv::Error) -> IngestionError {
    match err.into_kind() {
        csv::ErrorKind::Io(e) => IngestionError::io(path, e),
        other => IngestionError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::Other, format!("{:?}", other)),
        ),
    }
}
