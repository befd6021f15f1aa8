use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestionError>;

/// Failures that abort a run
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Format error: {0}")]
    Format(String),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for IngestionError {
    fn from(err: reqwest::Error) -> Self {
        IngestionError::Transport(err.to_string())
    }
}

impl IngestionError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IngestionError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A single field could not be read off a listing.
/// Always recovered into a missing value during projection.
#[derive(Debug, Error, PartialEq)]
pub enum FieldReadError {
    #[error("listing is not a JSON object")]
    NotAnObject,

    #[error("field `{field}` has unexpected shape: {found}")]
    UnexpectedShape { field: &'static str, found: String },
}
