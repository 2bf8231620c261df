//! Per-release match results

use serde::{Deserialize, Serialize};

use super::Release;

/// Album returned by the streaming catalog search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingAlbum {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<String>,
    pub uri: String,
    #[serde(default)]
    pub external_url: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
}

/// Raw storefront search result (albums, tracks, artists, labels all mixed)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorefrontHit {
    /// Result type as reported by the storefront ("album", "track", "artist", ...)
    #[serde(rename = "type")]
    pub item_type: String,
    pub name: String,
    #[serde(default)]
    pub artist: String,
    pub url: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Which lookup failed for an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupSource {
    Streaming,
    Storefront,
    Playlist,
}

/// A lookup that failed while processing one release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupFailure {
    pub source: LookupSource,
    pub message: String,
}

/// Result of reconciling one release against both catalogs
///
/// Created once per processed release and never mutated after it is recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchEntry {
    pub release: Release,
    pub matched_streaming: bool,
    pub streaming_hits: Vec<StreamingAlbum>,
    pub matched_storefront: bool,
    pub storefront_hits: Vec<StorefrontHit>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lookup_failures: Vec<LookupFailure>,
}

impl MatchEntry {
    pub fn new(
        release: Release,
        streaming_hits: Vec<StreamingAlbum>,
        storefront_hits: Vec<StorefrontHit>,
        lookup_failures: Vec<LookupFailure>,
    ) -> Self {
        Self {
            release,
            matched_streaming: !streaming_hits.is_empty(),
            streaming_hits,
            matched_storefront: !storefront_hits.is_empty(),
            storefront_hits,
            lookup_failures,
        }
    }

    /// True when the given source failed for this entry
    pub fn failed_on(&self, source: LookupSource) -> bool {
        self.lookup_failures.iter().any(|f| f.source == source)
    }
}
