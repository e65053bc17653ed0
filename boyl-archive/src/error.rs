use std::path::PathBuf;

/// Errors that can occur while inspecting or extracting an archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// An entry resolved to a location outside the extraction base directory.
    #[error("illegal path: {}", .0.display())]
    IllegalPath(PathBuf),

    /// The archive name has no recognized extension.
    #[error("unsupported archive: {0}")]
    UnsupportedArchive(String),

    /// Extraction was cancelled before it finished.
    #[error("extraction cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The archive (or its compression layer) could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl ArchiveError {
    pub fn decode(msg: impl std::fmt::Display) -> Self {
        Self::Decode(msg.to_string())
    }

    pub fn unsupported(name: impl Into<String>) -> Self {
        Self::UnsupportedArchive(name.into())
    }
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(e: zip::result::ZipError) -> Self {
        match e {
            zip::result::ZipError::Io(io) => Self::Io(io),
            other => Self::decode(other),
        }
    }
}
