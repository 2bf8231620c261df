//! External catalog clients
//!
//! The builder talks to three outside services through narrow traits so the
//! pipeline can be driven by test doubles:
//! - [`ReleaseSource`]: paginated release listing (Metal Archives)
//! - [`StreamingCatalog`]: album search and playlist mutation (Spotify)
//! - [`Storefront`]: keyword search, unfiltered (Bandcamp)

pub mod bandcamp;
pub mod factory;
pub mod metal_archives;
pub mod spotify;

pub use bandcamp::BandcampClient;
pub use factory::{ClientFactory, ClientSetupError, HttpClientFactory};
pub use metal_archives::{MetalArchivesClient, RELEASE_PAGE_SIZE};
pub use spotify::SpotifyClient;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{
    Playlist, ReleasePage, ReleasePeriod, StorefrontHit, StreamingAlbum, StreamingUser, Track,
};

/// Source catalog errors
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Streaming catalog errors
#[derive(Debug, Error)]
pub enum StreamingError {
    /// Missing, invalid or expired bearer credential
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl StreamingError {
    /// Errors that will fail every following call too, so a run cannot usefully continue
    pub fn is_systemic(&self) -> bool {
        matches!(self, StreamingError::Unauthorized(_))
    }
}

/// Storefront errors
#[derive(Debug, Error)]
pub enum StorefrontError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Paginated source of candidate releases
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Fetch page `page` (zero based) of releases for a month and genre filter
    ///
    /// `genre` is passed through unchanged; `*` matches every genre.
    async fn fetch_page(
        &self,
        period: ReleasePeriod,
        genre: &str,
        page: usize,
    ) -> Result<ReleasePage, CatalogError>;
}

/// Streaming service catalog and playlist API
///
/// Implementations carry the owner's bearer credential.
#[async_trait]
pub trait StreamingCatalog: Send + Sync {
    /// Album search with a structured query (`artist:... album:...`)
    async fn search_albums(&self, query: &str) -> Result<Vec<StreamingAlbum>, StreamingError>;

    async fn current_user(&self) -> Result<StreamingUser, StreamingError>;

    async fn create_playlist(&self, user_id: &str, name: &str)
        -> Result<Playlist, StreamingError>;

    async fn get_playlist(&self, playlist_id: &str) -> Result<Playlist, StreamingError>;

    /// Ids of every track currently in the playlist
    async fn playlist_track_ids(&self, playlist_id: &str) -> Result<Vec<String>, StreamingError>;

    async fn album_tracks(&self, album_id: &str) -> Result<Vec<Track>, StreamingError>;

    /// Append track URIs to the end of the playlist
    async fn append_tracks(&self, playlist_id: &str, uris: &[String])
        -> Result<(), StreamingError>;
}

/// Storefront keyword search
///
/// Results are coarse substring matches of any type; callers must post-filter.
#[async_trait]
pub trait Storefront: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<StorefrontHit>, StorefrontError>;
}
