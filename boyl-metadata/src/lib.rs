//! Game metadata lookup against online catalogs.
//!
//! Every source implements [`MetadataProvider`]; [`find_first`] walks a
//! priority-ordered chain of them and stops at the first hit.

pub mod error;
pub mod gog;
pub mod igdb;
pub mod steam;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use error::MetadataError;
pub use gog::GogProvider;
pub use igdb::IgdbProvider;
pub use steam::SteamProvider;

/// Provider-agnostic description of a game.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataGame {
    pub name: String,
    pub summary: String,
    pub release_date: DateTime<Utc>,
    /// `0..=100`.
    pub rating: f64,
    pub genres: Vec<String>,
    pub cover: String,
    pub artworks: Vec<String>,
    pub screenshots: Vec<String>,
    /// Short tag of the provider that produced this entry.
    pub provider: String,
    /// The provider's own id for the game.
    pub provider_id: String,
}

/// A source of game metadata.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Short tag stored alongside matches, e.g. `"igdb"`.
    fn name(&self) -> &str;

    /// Look up `name` released in `year`.
    ///
    /// Returns [`MetadataError::NotFound`] when the provider has no match;
    /// any other error means the provider could not be queried.
    async fn find(&self, name: &str, year: i32) -> Result<MetadataGame, MetadataError>;
}

/// Query `providers` in order and return the first match.
///
/// `Ok(None)` means every provider answered `NotFound`. Any other error
/// stops the chain immediately.
pub async fn find_first(
    providers: &[Box<dyn MetadataProvider>],
    name: &str,
    year: i32,
) -> Result<Option<MetadataGame>, MetadataError> {
    for provider in providers {
        match provider.find(name, year).await {
            Ok(game) => {
                log::debug!("{} matched '{}' ({}) as '{}'", provider.name(), name, year, game.name);
                return Ok(Some(game));
            }
            Err(MetadataError::NotFound) => {
                log::debug!("{} has no match for '{}' ({})", provider.name(), name, year);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

/// The HTTP client shared by every provider.
pub fn http_client() -> Result<reqwest::Client, MetadataError> {
    Ok(reqwest::Client::builder()
        .user_agent(concat!("boyl/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(30))
        .build()?)
}

/// The standard provider chain: IGDB, then GOG, then Steam.
pub fn default_providers(
    http: reqwest::Client,
    igdb_client_id: &str,
    igdb_client_secret: &str,
) -> Vec<Box<dyn MetadataProvider>> {
    vec![
        Box::new(IgdbProvider::new(http.clone(), igdb_client_id, igdb_client_secret)),
        Box::new(GogProvider::new(http.clone())),
        Box::new(SteamProvider::new(http)),
    ]
}
