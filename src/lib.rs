//! Daily listings snapshot: search, project, write CSV, upload.

pub mod ingestion;
