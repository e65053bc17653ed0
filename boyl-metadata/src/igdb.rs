//! IGDB provider.
//!
//! IGDB sits behind Twitch's OAuth2 client-credentials flow. The app token
//! is fetched lazily and reused until shortly before it expires.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::error::{MetadataError, check_status};
use crate::{MetadataGame, MetadataProvider};

pub const PROVIDER_ID: &str = "igdb";
const GAMES_URL: &str = "https://api.igdb.com/v4/games";
const TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";

/// A token is treated as expired this long before its advertised expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(10);

const FIELDS: &[&str] = &[
    "name",
    "summary",
    "first_release_date",
    "total_rating",
    "genres.name",
    "cover.url",
    "artworks.url",
    "screenshots.url",
];

#[derive(Debug, Clone)]
struct Token {
    access_token: String,
    expiry: Instant,
}

impl Token {
    fn is_valid(&self) -> bool {
        Instant::now() + EXPIRY_MARGIN < self.expiry
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

pub struct IgdbProvider {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<Token>>,
}

impl IgdbProvider {
    pub fn new(http: reqwest::Client, client_id: &str, client_secret: &str) -> Self {
        Self {
            http,
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            token: Mutex::new(None),
        }
    }

    /// Return a valid access token, fetching a new one if needed.
    async fn access_token(&self) -> Result<String, MetadataError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_valid()) {
            return Ok(token.access_token.clone());
        }

        log::debug!("Requesting IGDB access token");
        let resp = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Err(MetadataError::Auth(format!(
                "unexpected status code for token: {}",
                status.as_u16()
            )));
        }

        let text = resp.text().await?;
        let parsed: TokenResponse = serde_json::from_str(&text)
            .map_err(|e| MetadataError::Auth(format!("malformed token response: {e}")))?;
        let token = Token {
            access_token: parsed.access_token,
            expiry: Instant::now() + Duration::from_secs(parsed.expires_in),
        };
        let access = token.access_token.clone();
        *cached = Some(token);
        Ok(access)
    }
}

#[async_trait]
impl MetadataProvider for IgdbProvider {
    fn name(&self) -> &str {
        PROVIDER_ID
    }

    async fn find(&self, name: &str, year: i32) -> Result<MetadataGame, MetadataError> {
        let query = build_query(name, year)?;
        let token = self.access_token().await?;

        let resp = self
            .http
            .post(GAMES_URL)
            .header("Client-ID", &self.client_id)
            .bearer_auth(token)
            .body(query)
            .send()
            .await?;
        let text = check_status(resp).await?.text().await?;
        parse_games(&text)
    }
}

fn year_start(year: i32) -> Result<i64, MetadataError> {
    NaiveDate::from_ymd_opt(year, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
        .ok_or_else(|| MetadataError::decode(format!("year out of range: {year}")))
}

/// The Apicalypse query for a name released within `year`.
pub fn build_query(name: &str, year: i32) -> Result<String, MetadataError> {
    Ok(format!(
        r#"fields {}; search "{}"; where first_release_date > {} & first_release_date < {}; limit 1;"#,
        FIELDS.join(","),
        name,
        year_start(year)?,
        year_start(year + 1)?,
    ))
}

/// Upgrade an image URL to its full-resolution variant.
pub fn hq_image(url: &str) -> String {
    let absolute = match url.strip_prefix("//") {
        Some(rest) => format!("https://{rest}"),
        None => url.to_string(),
    };
    absolute.replacen("t_thumb", "t_1080p", 1)
}

#[derive(Deserialize)]
struct Named {
    name: String,
}

#[derive(Deserialize)]
struct Image {
    #[serde(default)]
    url: String,
}

#[derive(Deserialize)]
struct SearchResult {
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    first_release_date: i64,
    #[serde(default)]
    total_rating: f64,
    #[serde(default)]
    genres: Vec<Named>,
    cover: Option<Image>,
    #[serde(default)]
    artworks: Vec<Image>,
    #[serde(default)]
    screenshots: Vec<Image>,
}

/// Parse a `/v4/games` response body; an empty array is `NotFound`.
pub fn parse_games(text: &str) -> Result<MetadataGame, MetadataError> {
    let results: Vec<SearchResult> = serde_json::from_str(text)?;
    let Some(result) = results.into_iter().next() else {
        return Err(MetadataError::NotFound);
    };

    let release_date = DateTime::<Utc>::from_timestamp(result.first_release_date, 0)
        .ok_or_else(|| MetadataError::decode("release date out of range"))?;

    Ok(MetadataGame {
        name: result.name,
        summary: result.summary,
        release_date,
        rating: result.total_rating,
        genres: result.genres.into_iter().map(|g| g.name).collect(),
        cover: result.cover.map(|c| hq_image(&c.url)).unwrap_or_default(),
        artworks: result.artworks.iter().map(|a| hq_image(&a.url)).collect(),
        screenshots: result.screenshots.iter().map(|s| hq_image(&s.url)).collect(),
        provider: PROVIDER_ID.to_string(),
        provider_id: result.id.to_string(),
    })
}
