//! GOG provider.
//!
//! The catalog API supplies everything except the description, which is
//! scraped from the product page.

use std::fmt::Write;
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use scraper::{ElementRef, Html, Node, Selector};
use serde::Deserialize;

use crate::error::{MetadataError, check_status};
use crate::{MetadataGame, MetadataProvider};

pub const PROVIDER_ID: &str = "gog";
const CATALOG_URL: &str = "https://catalog.gog.com/v1/catalog";
const GAME_URL: &str = "https://www.gog.com/en/game";
const DATE_FORMAT: &str = "%Y.%m.%d";

static DESCRIPTION_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.description").unwrap());

/// Classes whose elements are dropped from the description.
const DROPPED_CLASSES: &[&str] = &["description__copyrights", "module"];

/// Elements whose content is never part of a description.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Elements whose whitespace is significant.
const PREFORMATTED_ELEMENTS: &[&str] = &["pre", "textarea"];

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

pub struct GogProvider {
    http: reqwest::Client,
}

impl GogProvider {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn description(&self, slug: &str) -> Result<String, MetadataError> {
        let resp = self.http.get(format!("{GAME_URL}/{slug}")).send().await?;
        let page = check_status(resp).await?.text().await?;
        Ok(extract_description(&page))
    }
}

/// Query parameters for a catalog search. `beetween` is what the API
/// expects.
pub fn catalog_query(name: &str, year: i32) -> Vec<(&'static str, String)> {
    vec![
        ("limit", "1".to_string()),
        ("productType", "in:game,pack".to_string()),
        ("releaseDate", format!("beetween:{},{}", year - 1, year + 1)),
        ("query", format!("like:{name}")),
    ]
}

#[async_trait]
impl MetadataProvider for GogProvider {
    fn name(&self) -> &str {
        PROVIDER_ID
    }

    async fn find(&self, name: &str, year: i32) -> Result<MetadataGame, MetadataError> {
        let resp = self
            .http
            .get(CATALOG_URL)
            .query(&catalog_query(name, year))
            .send()
            .await?;
        let text = check_status(resp).await?.text().await?;
        let product = parse_catalog(&text)?;
        let summary = self.description(&product.slug).await?;
        product.into_game(summary)
    }
}

#[derive(Deserialize)]
struct CatalogResult {
    #[serde(default)]
    products: Vec<Product>,
}

#[derive(Deserialize)]
struct Genre {
    name: String,
}

/// One product from the catalog search.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub slug: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    release_date: String,
    #[serde(default)]
    reviews_rating: f64,
    #[serde(default)]
    genres: Vec<Genre>,
    #[serde(default)]
    cover_horizontal: String,
    #[serde(default)]
    cover_vertical: String,
    #[serde(default)]
    screenshots: Vec<String>,
}

impl Product {
    /// Combine the catalog entry with its scraped description.
    pub fn into_game(self, summary: String) -> Result<MetadataGame, MetadataError> {
        let date = NaiveDate::parse_from_str(&self.release_date, DATE_FORMAT).map_err(|e| {
            MetadataError::decode(format!("release date '{}': {e}", self.release_date))
        })?;
        let release_date =
            DateTime::<Utc>::from_naive_utc_and_offset(date.and_time(NaiveTime::default()), Utc);

        Ok(MetadataGame {
            name: self.title,
            summary,
            release_date,
            rating: self.reviews_rating * 2.0,
            genres: self.genres.into_iter().map(|g| g.name).collect(),
            cover: hq_image(&self.cover_vertical),
            artworks: vec![hq_image(&self.cover_horizontal)],
            screenshots: self.screenshots.iter().map(|s| hq_image(s)).collect(),
            provider: PROVIDER_ID.to_string(),
            provider_id: self.id,
        })
    }
}

/// Parse a catalog response and take its first product.
pub fn parse_catalog(text: &str) -> Result<Product, MetadataError> {
    let result: CatalogResult = serde_json::from_str(text)?;
    result.products.into_iter().next().ok_or(MetadataError::NotFound)
}

/// Strip the `_{formatter}` size template from an image URL.
pub fn hq_image(url: &str) -> String {
    url.replace("_{formatter}", "")
}

/// Render the first `div.description` of a product page as compact HTML.
///
/// Copyright and module blocks, scripts and comments are dropped, class
/// attributes are removed, and insignificant whitespace is collapsed
/// outside `pre` and `textarea`. Returns an empty string when the page has
/// no description.
pub fn extract_description(page: &str) -> String {
    let document = Html::parse_document(page);
    let mut out = String::new();
    if let Some(description) = document.select(&DESCRIPTION_SELECTOR).next() {
        render_children(description, false, &mut out);
    }
    out.trim().to_string()
}

fn render_children(element: ElementRef<'_>, preformatted: bool, out: &mut String) {
    let children: Vec<_> = element.children().collect();
    let last = children.len().saturating_sub(1);
    for (i, child) in children.into_iter().enumerate() {
        match child.value() {
            Node::Text(text) if preformatted => {
                text.chars().for_each(|c| push_escaped(c, false, out));
            }
            Node::Text(text) => {
                // Whitespace at the edges of an element is insignificant.
                let mut text: &str = text;
                if i == 0 {
                    text = text.trim_start();
                }
                if i == last {
                    text = text.trim_end();
                }
                push_text(text, out);
            }
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    render_element(child, preformatted, out);
                }
            }
            _ => {}
        }
    }
}

fn render_element(element: ElementRef<'_>, preformatted: bool, out: &mut String) {
    let value = element.value();
    let name = value.name();
    if RAW_TEXT_ELEMENTS.contains(&name)
        || value
            .attr("class")
            .is_some_and(|class| DROPPED_CLASSES.contains(&class))
    {
        return;
    }

    out.push('<');
    out.push_str(name);
    for (attr, attr_value) in value.attrs() {
        if attr == "class" {
            continue;
        }
        let _ = write!(out, " {attr}=\"");
        attr_value.chars().for_each(|c| push_escaped(c, true, out));
        out.push('"');
    }
    out.push('>');

    if VOID_ELEMENTS.contains(&name) {
        return;
    }
    render_children(element, preformatted || PREFORMATTED_ELEMENTS.contains(&name), out);
    let _ = write!(out, "</{name}>");
}

/// Append a text node with whitespace runs collapsed to one space.
/// Whitespace-only nodes between tags are dropped.
fn push_text(text: &str, out: &mut String) {
    if text.trim().is_empty() {
        return;
    }
    let mut last_space = out.is_empty() || out.ends_with(' ');
    for c in text.chars() {
        if c.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
            continue;
        }
        push_escaped(c, false, out);
        last_space = false;
    }
}

fn push_escaped(c: char, attribute: bool, out: &mut String) {
    match c {
        '&' => out.push_str("&amp;"),
        '<' if !attribute => out.push_str("&lt;"),
        '>' if !attribute => out.push_str("&gt;"),
        '"' if attribute => out.push_str("&quot;"),
        _ => out.push(c),
    }
}
