//! Steam storefront provider.
//!
//! Three calls per lookup: a store search to find the app id, the app
//! details, then the review summary for the rating.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;

use crate::error::{MetadataError, check_status};
use crate::{MetadataGame, MetadataProvider};

pub const PROVIDER_ID: &str = "steam";
const SEARCH_URL: &str = "https://store.steampowered.com/api/storesearch";
const DETAILS_URL: &str = "https://store.steampowered.com/api/appdetails";
const REVIEW_URL: &str = "https://store.steampowered.com/appreviews";

/// Release dates come in either order depending on the store locale.
const DATE_FORMATS: &[&str] = &["%b %d, %Y", "%d %b, %Y"];

pub struct SteamProvider {
    http: reqwest::Client,
}

impl SteamProvider {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<String, MetadataError> {
        let resp = self.http.get(url).query(query).send().await?;
        Ok(check_status(resp).await?.text().await?)
    }
}

#[async_trait]
impl MetadataProvider for SteamProvider {
    fn name(&self) -> &str {
        PROVIDER_ID
    }

    async fn find(&self, name: &str, _year: i32) -> Result<MetadataGame, MetadataError> {
        let search = self
            .get(SEARCH_URL, &[("term", name), ("l", "english"), ("cc", "US")])
            .await?;
        let app_id = parse_search(&search)?;
        let id = app_id.to_string();

        let details = self.get(DETAILS_URL, &[("appids", id.as_str())]).await?;
        let details = parse_details(&details, app_id)?;

        let reviews = self
            .get(&format!("{REVIEW_URL}/{id}"), &[("json", "1")])
            .await?;
        let rating = parse_rating(&reviews)?;

        details.into_game(app_id, rating)
    }
}

#[derive(Deserialize)]
struct SearchItem {
    id: u64,
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Deserialize)]
struct SearchResult {
    #[serde(default)]
    items: Vec<SearchItem>,
}

/// Id of the first search hit of type `app`.
pub fn parse_search(text: &str) -> Result<u64, MetadataError> {
    let result: SearchResult = serde_json::from_str(text)?;
    result
        .items
        .into_iter()
        .find(|item| item.kind == "app")
        .map(|item| item.id)
        .ok_or(MetadataError::NotFound)
}

#[derive(Deserialize)]
struct ReleaseDate {
    #[serde(default)]
    date: String,
}

#[derive(Deserialize)]
struct Genre {
    description: String,
}

#[derive(Deserialize)]
struct Screenshot {
    path_full: String,
}

/// The `data` object of an app details response.
#[derive(Deserialize)]
pub struct AppDetails {
    #[serde(default)]
    name: String,
    #[serde(default)]
    short_description: String,
    release_date: Option<ReleaseDate>,
    #[serde(default)]
    genres: Vec<Genre>,
    #[serde(default)]
    header_image: String,
    #[serde(default)]
    background_raw: String,
    #[serde(default)]
    screenshots: Vec<Screenshot>,
}

#[derive(Deserialize)]
struct DetailsItem {
    data: Option<AppDetails>,
}

impl AppDetails {
    pub fn into_game(self, app_id: u64, rating: f64) -> Result<MetadataGame, MetadataError> {
        let date = self.release_date.map(|r| r.date).unwrap_or_default();
        Ok(MetadataGame {
            name: self.name,
            summary: self.short_description,
            release_date: parse_steam_date(&date)?,
            rating,
            genres: self.genres.into_iter().map(|g| g.description).collect(),
            cover: clean_image_url(&self.header_image),
            artworks: vec![clean_image_url(&self.background_raw)],
            screenshots: self
                .screenshots
                .iter()
                .map(|s| clean_image_url(&s.path_full))
                .collect(),
            provider: PROVIDER_ID.to_string(),
            provider_id: app_id.to_string(),
        })
    }
}

/// Pick the entry for `app_id` out of an app details response.
pub fn parse_details(text: &str, app_id: u64) -> Result<AppDetails, MetadataError> {
    let mut result: HashMap<String, DetailsItem> = serde_json::from_str(text)?;
    result
        .remove(&app_id.to_string())
        .and_then(|item| item.data)
        .ok_or_else(|| MetadataError::decode(format!("no details found for app {app_id}")))
}

#[derive(Deserialize)]
struct QuerySummary {
    #[serde(default)]
    total_positive: u64,
    #[serde(default)]
    total_negative: u64,
}

#[derive(Deserialize)]
struct ReviewResult {
    query_summary: QuerySummary,
}

/// Share of positive reviews as a percentage. No reviews rates 0.
pub fn parse_rating(text: &str) -> Result<f64, MetadataError> {
    let result: ReviewResult = serde_json::from_str(text)?;
    let QuerySummary {
        total_positive,
        total_negative,
    } = result.query_summary;
    let total = total_positive + total_negative;
    if total == 0 {
        return Ok(0.0);
    }
    Ok(100.0 * total_positive as f64 / total as f64)
}

pub fn parse_steam_date(date: &str) -> Result<DateTime<Utc>, MetadataError> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(date, format).ok())
        .map(|d| DateTime::from_naive_utc_and_offset(d.and_time(NaiveTime::default()), Utc))
        .ok_or_else(|| MetadataError::decode(format!("unrecognized release date '{date}'")))
}

/// Drop the query string (cache busters) from an image URL.
pub fn clean_image_url(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.to_string()
        }
        Err(_) => url.to_string(),
    }
}
