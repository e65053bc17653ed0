//! Server side of boyl: keeps a catalog of the game archives in a
//! directory, enriched with metadata from online providers.

pub mod config;
pub mod error;
pub mod filename;
pub mod media;
pub mod scan;

pub use config::ServerConfig;
pub use error::{ConfigError, ScanError};
pub use filename::{FilenameMetadata, InvalidFilename, parse_filename};
pub use media::{HttpMedia, MediaSource, StoredMedia, store_media};
pub use scan::{Match, Missing, STATUS_ID, ScanResult, Scanner, find_archives, is_archive};
