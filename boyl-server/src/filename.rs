use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

/// `Some Name (v<version>) (<year>).<ext>`
static FILENAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(.*) \(v(.*?)\) \((\d{4})\)\.\w+").unwrap());

/// What an archive's file name says about its game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameMetadata {
    pub name: String,
    pub version: String,
    pub year: i32,
}

impl FilenameMetadata {
    /// The canonical file name for this game with extension `ext`.
    pub fn file_name(&self, ext: &str) -> String {
        format!("{} (v{}) ({}).{ext}", self.name, self.version, self.year)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid filename: {0}")]
pub struct InvalidFilename(pub String);

/// Parse the base name of `path`.
pub fn parse_filename(path: &str) -> Result<FilenameMetadata, InvalidFilename> {
    let base = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    let invalid = || InvalidFilename(base.to_string());

    let caps = FILENAME_RE.captures(&base).ok_or_else(invalid)?;
    let year = caps[3].parse().map_err(|_| invalid())?;
    Ok(FilenameMetadata {
        name: caps[1].to_string(),
        version: caps[2].to_string(),
        year,
    })
}
