//! Cover art, artworks and screenshots stored next to the catalog.

use std::fs;
use std::path::Path;

use async_trait::async_trait;
use boyl_metadata::MetadataGame;

use crate::error::ScanError;

/// Somewhere image bytes can be fetched from.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ScanError>;
}

/// Fetches media over HTTP.
pub struct HttpMedia {
    http: reqwest::Client,
}

impl HttpMedia {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl MediaSource for HttpMedia {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ScanError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ScanError::media(url, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ScanError::media(url, format!("status {}", status.as_u16())));
        }
        let bytes = resp.bytes().await.map_err(|e| ScanError::media(url, e))?;
        Ok(bytes.to_vec())
    }
}

/// File names of the media stored for one game.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StoredMedia {
    pub cover: String,
    pub artworks: Vec<String>,
    pub screenshots: Vec<String>,
}

/// Fetch every image of `game` into `dir`, replacing whatever was there.
///
/// Empty URLs are skipped.
pub async fn store_media(
    source: &dyn MediaSource,
    dir: &Path,
    game: &MetadataGame,
) -> Result<StoredMedia, ScanError> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;

    let mut stored = StoredMedia::default();
    if !game.cover.is_empty() {
        stored.cover = store_one(source, dir, "cover", &game.cover).await?;
    }
    for (i, url) in game.artworks.iter().enumerate() {
        if !url.is_empty() {
            let prefix = format!("artwork{i}");
            stored.artworks.push(store_one(source, dir, &prefix, url).await?);
        }
    }
    for (i, url) in game.screenshots.iter().enumerate() {
        if !url.is_empty() {
            let prefix = format!("screenshot{i}");
            stored.screenshots.push(store_one(source, dir, &prefix, url).await?);
        }
    }
    Ok(stored)
}

async fn store_one(
    source: &dyn MediaSource,
    dir: &Path,
    prefix: &str,
    url: &str,
) -> Result<String, ScanError> {
    let bytes = source.fetch(url).await?;
    let name = format!("{prefix}_{}", file_name_from_url(url));
    fs::write(dir.join(&name), bytes)?;
    log::debug!("Stored {url} as {name}");
    Ok(name)
}

/// Last path segment of `url`, reduced to characters safe in a file name.
pub fn file_name_from_url(url: &str) -> String {
    let segment = reqwest::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
        })
        .unwrap_or_default();
    let clean: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if clean.trim_matches('.').is_empty() {
        "image".to_string()
    } else {
        clean
    }
}
