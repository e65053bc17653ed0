//! Typed records for every collection.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const ID_LENGTH: usize = 15;

/// Generate a fresh 15-character lowercase alphanumeric record id.
pub fn new_id() -> String {
    let mut rng = rand::rng();
    (0..ID_LENGTH)
        .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// Current time as an RFC 3339 UTC timestamp.
pub fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

/// Implements string conversion and SQLite mapping for a unit enum.
macro_rules! text_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

// ── Client ──────────────────────────────────────────────────────────────────

/// Position of a download in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Starting,
    Downloading,
    Extracting,
    Completed,
    Failed,
}

text_enum!(DownloadStatus, "download status", {
    Starting => "starting",
    Downloading => "downloading",
    Extracting => "extracting",
    Completed => "completed",
    Failed => "failed",
});

impl DownloadStatus {
    /// `completed` and `failed` are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadStatus::Completed | DownloadStatus::Failed)
    }
}

/// Persisted state of one download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub id: String,
    /// Remote game id.
    pub game: String,
    pub status: DownloadStatus,
    /// Fraction of the current phase, in `[0, 1]`.
    pub progress: f64,
    /// Bytes per second.
    pub speed: f64,
    /// Bytes.
    pub total: u64,
    /// Last error message.
    pub text: String,
    pub active: bool,
    pub created: String,
    pub updated: String,
}

impl DownloadRecord {
    /// A fresh `starting` record for `game`. Not yet persisted.
    pub fn new(game: &str) -> Self {
        let ts = now();
        Self {
            id: new_id(),
            game: game.to_string(),
            status: DownloadStatus::Starting,
            progress: 0.0,
            speed: 0.0,
            total: 0,
            text: String::new(),
            active: false,
            created: ts.clone(),
            updated: ts,
        }
    }
}

/// An installed game on the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientGame {
    pub id: String,
    /// Remote game id; unique.
    pub game: String,
    /// Install directory.
    pub path: String,
    /// Absolute path of the launcher, or empty if none was found.
    pub executable: String,
}

// ── Server ──────────────────────────────────────────────────────────────────

/// Classification of a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Found,
    Missing,
    Invalid,
    Deleted,
}

text_enum!(GameStatus, "game status", {
    Found => "found",
    Missing => "missing",
    Invalid => "invalid",
    Deleted => "deleted",
});

/// A catalog entry, keyed by archive path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    pub id: String,
    pub path: String,
    pub name: String,
    pub summary: String,
    /// RFC 3339 release instant, if known.
    pub released: Option<String>,
    pub rating: f64,
    pub genres: Vec<String>,
    pub version: String,
    pub provider: String,
    pub provider_id: String,
    pub status: GameStatus,
    /// Stored media file names, relative to the record's media directory.
    pub cover: String,
    pub artworks: Vec<String>,
    pub screenshots: Vec<String>,
    pub created: String,
    pub updated: String,
}

impl GameRecord {
    /// An empty record for `path`. Not yet persisted.
    pub fn new(path: &str, status: GameStatus) -> Self {
        let ts = now();
        Self {
            id: new_id(),
            path: path.to_string(),
            name: String::new(),
            summary: String::new(),
            released: None,
            rating: 0.0,
            genres: Vec::new(),
            version: String::new(),
            provider: String::new(),
            provider_id: String::new(),
            status,
            cover: String::new(),
            artworks: Vec::new(),
            screenshots: Vec::new(),
            created: ts.clone(),
            updated: ts,
        }
    }
}

/// Progress of a long-running server operation, mirrored for observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStatus {
    pub id: String,
    pub name: String,
    pub text: String,
    pub total: u64,
    pub current: u64,
}
