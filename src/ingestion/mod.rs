//! Data ingestion module - functional pipeline for listing snapshots

pub mod error;
pub mod fetch;
pub mod parse;
pub mod pipeline;
pub mod search;
#[cfg(test)]
pub(crate) mod testing;
pub mod types;
pub mod upload;
pub mod utils;
pub mod write;

pub use error::{FieldReadError, IngestionError};
pub use types::*;
