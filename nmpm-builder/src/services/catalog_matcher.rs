//! Per-release lookup against the streaming catalog and the storefront
//!
//! Matching is case-insensitive artist/title equality only; no fuzzy matching.
//! A failed lookup degrades one entry (zero hits for that source) and never
//! the whole run, except for credential failures which the caller must treat
//! as fatal once the entry is recorded.

use std::sync::Arc;

use crate::clients::{Storefront, StreamingCatalog, StreamingError};
use crate::models::{LookupFailure, LookupSource, MatchEntry, Release, StorefrontHit};

/// Storefront result type kept by the local filter
const STOREFRONT_ALBUM_TYPE: &str = "album";

/// Match entry of one release plus any run-fatal lookup error
#[derive(Debug)]
pub struct MatchOutcome {
    pub entry: MatchEntry,
    /// Set when the streaming credential was rejected
    pub systemic_error: Option<StreamingError>,
}

/// Looks up one release in both catalogs
pub struct CatalogMatcher {
    streaming: Arc<dyn StreamingCatalog>,
    storefront: Arc<dyn Storefront>,
}

impl CatalogMatcher {
    pub fn new(streaming: Arc<dyn StreamingCatalog>, storefront: Arc<dyn Storefront>) -> Self {
        Self {
            streaming,
            storefront,
        }
    }

    /// Build the match entry for one release
    ///
    /// Both lookups always run and their failures are recorded on the entry.
    pub async fn match_release(&self, release: &Release) -> MatchOutcome {
        let mut failures = Vec::new();
        let mut systemic_error = None;

        let query = streaming_query(release);
        let streaming_hits = match self.streaming.search_albums(&query).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(
                    artist = %release.artist,
                    album = %release.album,
                    error = %e,
                    "Streaming lookup failed, treating as no match"
                );
                failures.push(LookupFailure {
                    source: LookupSource::Streaming,
                    message: e.to_string(),
                });
                if e.is_systemic() {
                    systemic_error = Some(e);
                }
                Vec::new()
            }
        };

        // The storefront has no combined artist/title query
        let storefront_hits = match self.storefront.search(&release.album).await {
            Ok(hits) => filter_storefront_hits(hits, release),
            Err(e) => {
                tracing::warn!(
                    artist = %release.artist,
                    album = %release.album,
                    error = %e,
                    "Storefront lookup failed, treating as no match"
                );
                failures.push(LookupFailure {
                    source: LookupSource::Storefront,
                    message: e.to_string(),
                });
                Vec::new()
            }
        };

        tracing::debug!(
            artist = %release.artist,
            album = %release.album,
            streaming = streaming_hits.len(),
            storefront = storefront_hits.len(),
            "Release matched"
        );

        MatchOutcome {
            entry: MatchEntry::new(release.clone(), streaming_hits, storefront_hits, failures),
            systemic_error,
        }
    }
}

/// Structured album query: lower-cased artist and album
pub fn streaming_query(release: &Release) -> String {
    format!(
        "artist:{} album:{}",
        release.artist.to_lowercase(),
        release.album.to_lowercase()
    )
}

/// Keep albums whose artist and title equal the release's, ignoring case
pub fn filter_storefront_hits(hits: Vec<StorefrontHit>, release: &Release) -> Vec<StorefrontHit> {
    let artist = release.artist.to_lowercase();
    let album = release.album.to_lowercase();

    hits.into_iter()
        .filter(|hit| {
            hit.item_type == STOREFRONT_ALBUM_TYPE
                && hit.artist.to_lowercase() == artist
                && hit.name.to_lowercase() == album
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release() -> Release {
        Release {
            artist: "Blood & Iron".to_string(),
            artist_url: String::new(),
            album: "Forged In Fire".to_string(),
            album_url: String::new(),
            genre: "Heavy Metal".to_string(),
            date: "2024-03-02".to_string(),
        }
    }

    fn hit(item_type: &str, artist: &str, name: &str) -> StorefrontHit {
        StorefrontHit {
            item_type: item_type.to_string(),
            name: name.to_string(),
            artist: artist.to_string(),
            url: format!("https://example.bandcamp.com/{}", name),
            image_url: None,
            release_date: None,
            tags: Vec::new(),
        }
    }

    #[test]
    fn test_streaming_query_is_lower_cased() {
        assert_eq!(
            streaming_query(&release()),
            "artist:blood & iron album:forged in fire"
        );
    }

    #[test]
    fn test_storefront_filter_requires_type_artist_and_title() {
        let hits = vec![
            hit("album", "BLOOD & IRON", "forged in fire"),
            hit("track", "Blood & Iron", "Forged In Fire"),
            hit("album", "Other Band", "Forged In Fire"),
            hit("album", "Blood & Iron", "Forged In Fire (Remastered)"),
        ];

        let kept = filter_storefront_hits(hits, &release());

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].artist, "BLOOD & IRON");
    }
}
