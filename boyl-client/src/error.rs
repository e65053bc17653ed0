use boyl_archive::ArchiveError;
use boyl_db::{OperationError, SchemaError};

/// Errors from talking to the catalog server.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status code: {code}, body: {body}")]
    Status { code: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("failed to start HTTP runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

impl RemoteError {
    pub fn decode(msg: impl std::fmt::Display) -> Self {
        Self::Decode(msg.to_string())
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(e: serde_json::Error) -> Self {
        Self::decode(e)
    }
}

/// Errors that stop a download job.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error(transparent)]
    Remote(RemoteError),

    #[error(transparent)]
    Archive(ArchiveError),

    #[error("database error: {0}")]
    Db(#[from] OperationError),

    #[error("database error: {0}")]
    Schema(#[from] SchemaError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("download cancelled")]
    Cancelled,

    #[error("download {0} not found")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl DownloadError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<RemoteError> for DownloadError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Cancelled => Self::Cancelled,
            other => Self::Remote(other),
        }
    }
}

impl From<ArchiveError> for DownloadError {
    fn from(e: ArchiveError) -> Self {
        match e {
            ArchiveError::Cancelled => Self::Cancelled,
            other => Self::Archive(other),
        }
    }
}
