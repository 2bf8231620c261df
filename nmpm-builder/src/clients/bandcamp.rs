//! Bandcamp search client
//!
//! Bandcamp has no public search API. The search page is fetched and its
//! result list scraped. Results are a keyword search over every item type, so
//! callers must filter them.

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use std::num::NonZeroU32;
use std::time::Duration;

use super::{Storefront, StorefrontError};
use crate::models::StorefrontHit;

const BANDCAMP_BASE_URL: &str = "https://bandcamp.com";

static RESULT_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("li.searchresult").expect("static selector"));
static ITEM_TYPE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".itemtype").expect("static selector"));
static HEADING_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".heading a").expect("static selector"));
static SUBHEAD_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".subhead").expect("static selector"));
static ITEM_URL_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".itemurl a").expect("static selector"));
static IMAGE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".art img").expect("static selector"));
static RELEASED_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".released").expect("static selector"));
static TAGS_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".tags").expect("static selector"));

/// Bandcamp search client
pub struct BandcampClient {
    http_client: reqwest::Client,
    base_url: String,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl BandcampClient {
    pub fn new() -> Result<Self, StorefrontError> {
        Self::with_base_url(BANDCAMP_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, StorefrontError> {
        let http_client = reqwest::Client::builder()
            .user_agent(nmpm_common::config::user_agent())
            .timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| StorefrontError::NetworkError(e.to_string()))?;

        let rate_limiter =
            RateLimiter::direct(Quota::per_second(NonZeroU32::new(2).expect("2 is non-zero")));

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limiter,
        })
    }
}

#[async_trait]
impl Storefront for BandcampClient {
    async fn search(&self, query: &str) -> Result<Vec<StorefrontHit>, StorefrontError> {
        self.rate_limiter.until_ready().await;

        tracing::debug!(query = %query, "Searching storefront");

        let response = self
            .http_client
            .get(format!("{}/search", self.base_url))
            .query(&[("q", query), ("page", "1")])
            .send()
            .await
            .map_err(|e| StorefrontError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(StorefrontError::ApiError(status.as_u16(), error_text));
        }

        let html = response
            .text()
            .await
            .map_err(|e| StorefrontError::ParseError(e.to_string()))?;

        Ok(parse_search_results(&html))
    }
}

/// Scrape the result list of a search page
///
/// Items missing a name or a link are skipped rather than failing the page.
pub fn parse_search_results(html: &str) -> Vec<StorefrontHit> {
    let document = Html::parse_document(html);

    document
        .select(&RESULT_SELECTOR)
        .filter_map(|result| parse_result(&result))
        .collect()
}

fn parse_result(result: &ElementRef<'_>) -> Option<StorefrontHit> {
    let item_type = first_text(result, &ITEM_TYPE_SELECTOR)?.to_lowercase();

    let heading = result.select(&HEADING_SELECTOR).next()?;
    let name = collapse_whitespace(&heading.text().collect::<String>());
    if name.is_empty() {
        return None;
    }

    let url = result
        .select(&ITEM_URL_SELECTOR)
        .next()
        .map(|a| collapse_whitespace(&a.text().collect::<String>()))
        .filter(|u| !u.is_empty())
        .or_else(|| heading.value().attr("href").map(strip_query))?;

    let artist = first_text(result, &SUBHEAD_SELECTOR)
        .map(|s| subhead_artist(&s))
        .unwrap_or_default();

    let image_url = result
        .select(&IMAGE_SELECTOR)
        .next()
        .and_then(|img| img.value().attr("src"))
        .map(str::to_string);

    let release_date = first_text(result, &RELEASED_SELECTOR)
        .map(|r| r.trim_start_matches("released").trim().to_string());

    let tags = first_text(result, &TAGS_SELECTOR)
        .map(|t| {
            t.trim_start_matches("tags:")
                .split(',')
                .map(|tag| tag.trim().to_string())
                .filter(|tag| !tag.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Some(StorefrontHit {
        item_type,
        name,
        artist,
        url,
        image_url,
        release_date,
        tags,
    })
}

fn first_text(element: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .next()
        .map(|e| collapse_whitespace(&e.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Artist of a subhead: "by Artist" for albums, "from Album by Artist" for tracks
///
/// Artist names may themselves contain " by ", so only the leading marker is cut.
fn subhead_artist(subhead: &str) -> String {
    if let Some(artist) = subhead.strip_prefix("by ") {
        return artist.trim().to_string();
    }
    if let Some(rest) = subhead.strip_prefix("from ") {
        if let Some((_, artist)) = rest.split_once(" by ") {
            return artist.trim().to_string();
        }
    }
    subhead.trim().to_string()
}

fn strip_query(url: &str) -> String {
    url.split('?').next().unwrap_or(url).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEARCH_PAGE: &str = r#"
        <html><body><ul class="result-items">
          <li class="searchresult data-search">
            <a class="artcont" href="https://bloodandiron.bandcamp.com/album/forged?from=search">
              <div class="art"><img src="https://f4.bcbits.com/img/a1_7.jpg"></div>
            </a>
            <div class="result-info">
              <div class="itemtype">ALBUM</div>
              <div class="heading"><a href="https://bloodandiron.bandcamp.com/album/forged?from=search">Forged</a></div>
              <div class="subhead">by Blood &amp; Iron</div>
              <div class="released">released March 2, 2024</div>
              <div class="itemurl"><a href="https://bloodandiron.bandcamp.com/album/forged?from=search">https://bloodandiron.bandcamp.com/album/forged</a></div>
              <div class="tags">tags: heavy metal, power metal</div>
            </div>
          </li>
          <li class="searchresult data-search">
            <div class="result-info">
              <div class="itemtype">TRACK</div>
              <div class="heading"><a href="https://someone.bandcamp.com/track/forged?from=search">Forged</a></div>
              <div class="subhead">from Anvil Songs by Someone Else</div>
            </div>
          </li>
          <li class="searchresult data-search">
            <div class="result-info"><div class="itemtype">ARTIST</div></div>
          </li>
        </ul></body></html>
    "#;

    #[test]
    fn test_parse_album_result() {
        let hits = parse_search_results(SEARCH_PAGE);
        assert_eq!(hits.len(), 2);

        let album = &hits[0];
        assert_eq!(album.item_type, "album");
        assert_eq!(album.name, "Forged");
        assert_eq!(album.artist, "Blood & Iron");
        assert_eq!(album.url, "https://bloodandiron.bandcamp.com/album/forged");
        assert_eq!(album.release_date.as_deref(), Some("March 2, 2024"));
        assert_eq!(album.tags, vec!["heavy metal".to_string(), "power metal".to_string()]);
        assert_eq!(
            album.image_url.as_deref(),
            Some("https://f4.bcbits.com/img/a1_7.jpg")
        );
    }

    #[test]
    fn test_parse_track_result_uses_heading_link() {
        let hits = parse_search_results(SEARCH_PAGE);
        let track = &hits[1];
        assert_eq!(track.item_type, "track");
        assert_eq!(track.artist, "Someone Else");
        assert_eq!(track.url, "https://someone.bandcamp.com/track/forged");
    }

    #[test]
    fn test_artist_containing_by_is_kept_whole() {
        let html = r#"
            <ul>
              <li class="searchresult">
                <div class="itemtype">ALBUM</div>
                <div class="heading"><a href="https://possessedbyfire.bandcamp.com/album/ashes">Ashes</a></div>
                <div class="subhead">by Possessed by Fire</div>
              </li>
              <li class="searchresult">
                <div class="itemtype">TRACK</div>
                <div class="heading"><a href="https://killedbydeath.bandcamp.com/track/ashes">Ashes</a></div>
                <div class="subhead">from Ashes by Killed by Death</div>
              </li>
            </ul>
        "#;
        let hits = parse_search_results(html);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].artist, "Possessed by Fire");
        assert_eq!(hits[1].artist, "Killed by Death");
    }

    #[test]
    fn test_subhead_artist_forms() {
        assert_eq!(subhead_artist("by Driven by Hate"), "Driven by Hate");
        assert_eq!(subhead_artist("from Anvil Songs by Someone Else"), "Someone Else");
        assert_eq!(subhead_artist("Unsigned Band"), "Unsigned Band");
    }

    #[test]
    fn test_empty_page_has_no_hits() {
        assert!(parse_search_results("<html><body></body></html>").is_empty());
    }
}
