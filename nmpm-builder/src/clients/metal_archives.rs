//! Metal Archives release search client
//!
//! Queries the advanced album search (`ajax-advanced/searching/albums`), which
//! answers in DataTables format: `aaData` rows of HTML cells plus
//! `iTotalRecords` for the whole query.

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;

use super::{CatalogError, ReleaseSource};
use crate::models::{Release, ReleasePage, ReleasePeriod};

const METAL_ARCHIVES_BASE_URL: &str = "https://www.metal-archives.com";
const SEARCH_PATH: &str = "/search/ajax-advanced/searching/albums";

/// Rows per page requested from the source (its maximum display length)
pub const RELEASE_PAGE_SIZE: usize = 200;

/// Release types included: full-length, EP, single
const RELEASE_TYPES: [u8; 3] = [1, 3, 5];

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("static regex"));
static HREF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"href="(.*?)""#).expect("static regex"));
static ISO_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4}-\d{2}-\d{2})").expect("static regex"));

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(rename = "iTotalRecords")]
    total_records: usize,
    #[serde(rename = "aaData")]
    rows: Vec<Vec<String>>,
}

/// Metal Archives API client
pub struct MetalArchivesClient {
    http_client: reqwest::Client,
    base_url: String,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl MetalArchivesClient {
    pub fn new() -> Result<Self, CatalogError> {
        Self::with_base_url(METAL_ARCHIVES_BASE_URL)
    }

    /// Client against a different host (mirrors, test servers)
    pub fn with_base_url(base_url: &str) -> Result<Self, CatalogError> {
        let http_client = reqwest::Client::builder()
            .user_agent(nmpm_common::config::user_agent())
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| CatalogError::NetworkError(e.to_string()))?;

        // The site throttles aggressive clients; one page per second is plenty
        let rate_limiter =
            RateLimiter::direct(Quota::per_second(NonZeroU32::new(1).expect("1 is non-zero")));

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limiter,
        })
    }

    fn query_params(period: ReleasePeriod, genre: &str, page: usize) -> Vec<(&'static str, String)> {
        let month = format!("{:02}", period.month);
        let year = format!("{:04}", period.year);

        let mut params = vec![
            ("genre", genre.to_string()),
            ("iDisplayStart", (page * RELEASE_PAGE_SIZE).to_string()),
            ("iDisplayLength", RELEASE_PAGE_SIZE.to_string()),
            ("releaseMonthFrom", month.clone()),
            ("releaseMonthTo", month),
            ("releaseYearFrom", year.clone()),
            ("releaseYearTo", year),
        ];
        for release_type in RELEASE_TYPES {
            params.push(("releaseType[]", release_type.to_string()));
        }
        params
    }
}

#[async_trait]
impl ReleaseSource for MetalArchivesClient {
    async fn fetch_page(
        &self,
        period: ReleasePeriod,
        genre: &str,
        page: usize,
    ) -> Result<ReleasePage, CatalogError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, SEARCH_PATH);
        tracing::debug!(period = %period, genre = %genre, page, "Querying release catalog");

        let response = self
            .http_client
            .get(&url)
            .query(&Self::query_params(period, genre, page))
            .send()
            .await
            .map_err(|e| CatalogError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(CatalogError::ApiError(status.as_u16(), error_text));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| CatalogError::ParseError(e.to_string()))?;

        let releases = body
            .rows
            .iter()
            .map(|row| parse_release_row(row))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            period = %period,
            page,
            rows = releases.len(),
            total = body.total_records,
            "Retrieved release page"
        );

        Ok(ReleasePage {
            releases,
            total: body.total_records,
        })
    }
}

/// Convert one `aaData` row into a release
///
/// Layout: `[artist anchor, album anchor, type, genre, date cell]`. Only the
/// first two cells and the last two are relied on.
pub fn parse_release_row(row: &[String]) -> Result<Release, CatalogError> {
    if row.len() < 4 {
        return Err(CatalogError::ParseError(format!(
            "Expected at least 4 cells, got {}",
            row.len()
        )));
    }

    let artist_cell = &row[0];
    let album_cell = &row[1];
    let genre_cell = &row[row.len() - 2];
    let date_cell = &row[row.len() - 1];

    let date = ISO_DATE_RE
        .captures_iter(date_cell)
        .last()
        .map(|c| c[1].to_string())
        .ok_or_else(|| CatalogError::ParseError(format!("No release date in '{}'", date_cell)))?;

    Ok(Release {
        artist: strip_tags(artist_cell),
        artist_url: extract_href(artist_cell)?,
        album: strip_tags(album_cell),
        album_url: extract_href(album_cell)?,
        genre: strip_tags(genre_cell),
        date,
    })
}

fn extract_href(cell: &str) -> Result<String, CatalogError> {
    HREF_RE
        .captures(cell)
        .map(|c| c[1].to_string())
        .ok_or_else(|| CatalogError::ParseError(format!("No link in '{}'", cell)))
}

/// Remove markup, decode the common entities, trim
fn strip_tags(cell: &str) -> String {
    TAG_RE
        .replace_all(cell, "")
        .replace("&quot;", "\"")
        .replace("&#039;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}
