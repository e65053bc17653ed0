use boyl_db::{OperationError, SchemaError};
use boyl_metadata::MetadataError;

use crate::filename::InvalidFilename;

/// Errors that abort a scan.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("scanning in progress")]
    AlreadyRunning,

    #[error(transparent)]
    InvalidFilename(#[from] InvalidFilename),

    #[error("metadata lookup failed: {0}")]
    Metadata(#[from] MetadataError),

    #[error("database error: {0}")]
    Db(#[from] OperationError),

    #[error("database error: {0}")]
    Schema(#[from] SchemaError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to walk games directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("failed to fetch media {url}: {reason}")]
    Media { url: String, reason: String },
}

impl ScanError {
    pub fn media(url: &str, reason: impl std::fmt::Display) -> Self {
        Self::Media {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Errors reading the server configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("no data directory on this platform; set BOYL_DATA_DIR")]
    NoDataDirectory,
}
