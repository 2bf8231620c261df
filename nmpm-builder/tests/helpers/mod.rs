//! Test Helper Utilities
//!
//! In-memory fakes of the three external catalogs, with failure injection and
//! call recording, plus pipeline/app constructors.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use nmpm_builder::clients::{
    CatalogError, ClientFactory, ReleaseSource, Storefront, StorefrontError, StreamingCatalog,
    StreamingError, RELEASE_PAGE_SIZE,
};
use nmpm_builder::models::{
    Playlist, Release, ReleasePage, ReleasePeriod, StorefrontHit, StreamingAlbum, StreamingUser,
    Track,
};
use nmpm_builder::services::catalog_matcher::streaming_query;
use nmpm_builder::services::{
    CatalogFetcher, CatalogMatcher, PlaylistMutator, ReconciliationPipeline, RunTracker,
};

pub fn release(artist: &str, album: &str, date: &str) -> Release {
    Release {
        artist: artist.to_string(),
        artist_url: format!("https://www.metal-archives.com/bands/{}", artist),
        album: album.to_string(),
        album_url: format!("https://www.metal-archives.com/albums/{}", album),
        genre: "Black Metal".to_string(),
        date: date.to_string(),
    }
}

/// Release catalog serving fixed releases per month in real-size pages
#[derive(Default)]
pub struct FakeReleaseSource {
    pub releases: HashMap<ReleasePeriod, Vec<Release>>,
    pub fail: bool,
    pub calls: Mutex<Vec<(ReleasePeriod, String, usize)>>,
}

impl FakeReleaseSource {
    /// All releases grouped by the month of their date
    pub fn with_releases(releases: Vec<Release>) -> Self {
        let mut by_period: HashMap<ReleasePeriod, Vec<Release>> = HashMap::new();
        for release in releases {
            let period = ReleasePeriod::from_date(&release.date).unwrap();
            by_period.entry(period).or_default().push(release);
        }
        Self {
            releases: by_period,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn periods_fetched(&self) -> Vec<ReleasePeriod> {
        let mut periods = Vec::new();
        for (period, _, _) in self.calls.lock().unwrap().iter() {
            if !periods.contains(period) {
                periods.push(*period);
            }
        }
        periods
    }
}

#[async_trait]
impl ReleaseSource for FakeReleaseSource {
    async fn fetch_page(
        &self,
        period: ReleasePeriod,
        genre: &str,
        page: usize,
    ) -> Result<ReleasePage, CatalogError> {
        self.calls
            .lock()
            .unwrap()
            .push((period, genre.to_string(), page));

        if self.fail {
            return Err(CatalogError::ApiError(503, "Service Unavailable".to_string()));
        }

        let all = self.releases.get(&period).cloned().unwrap_or_default();
        let start = (page * RELEASE_PAGE_SIZE).min(all.len());
        let end = (start + RELEASE_PAGE_SIZE).min(all.len());

        Ok(ReleasePage {
            releases: all[start..end].to_vec(),
            total: all.len(),
        })
    }
}

/// Streaming catalog with an in-memory playlist
#[derive(Default)]
pub struct FakeStreaming {
    /// Search results by exact query
    pub albums: HashMap<String, Vec<StreamingAlbum>>,
    /// Tracks by album id
    pub tracks: HashMap<String, Vec<Track>>,
    /// Playlists `get_playlist` can find
    pub playlists: HashMap<String, Playlist>,
    /// Track ids per playlist id
    pub playlist_tracks: Mutex<HashMap<String, Vec<String>>>,
    /// Searches matching these queries fail with a network error
    pub failing_searches: HashSet<String>,
    /// The n-th search call (1-based) and every later one is rejected as unauthorized
    pub unauthorized_from_search: Option<usize>,
    /// Appends fail with an API error
    pub fail_appends: bool,
    /// Only the n-th append call (1-based) fails
    pub fail_append_call: Option<usize>,
    pub append_attempts: Mutex<usize>,
    /// Cancel this token once n searches have been made
    pub cancel_after_searches: Option<(usize, CancellationToken)>,
    pub search_calls: Mutex<Vec<String>>,
    pub append_calls: Mutex<Vec<(String, Vec<String>)>>,
    pub created_playlists: Mutex<Vec<Playlist>>,
}

impl FakeStreaming {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one album with `track_count` tracks as the search result for `release`
    pub fn with_album(mut self, release: &Release, album_id: &str, track_count: usize) -> Self {
        let album = StreamingAlbum {
            id: album_id.to_string(),
            name: release.album.clone(),
            artists: vec![release.artist.clone()],
            uri: format!("spotify:album:{}", album_id),
            external_url: Some(format!("https://open.spotify.com/album/{}", album_id)),
            release_date: Some(release.date.clone()),
        };
        self.albums
            .entry(streaming_query(release))
            .or_default()
            .push(album);
        self.tracks.insert(
            album_id.to_string(),
            (1..=track_count)
                .map(|n| {
                    let id = format!("{}-t{}", album_id, n);
                    Track {
                        uri: format!("spotify:track:{}", id),
                        name: format!("Track {}", n),
                        id,
                    }
                })
                .collect(),
        );
        self
    }

    /// Fail only the n-th append call (1-based)
    pub fn failing_append_call(mut self, n: usize) -> Self {
        self.fail_append_call = Some(n);
        self
    }

    /// Register an existing playlist already holding `track_ids`
    pub fn with_playlist(mut self, playlist_id: &str, track_ids: &[&str]) -> Self {
        self.playlists.insert(
            playlist_id.to_string(),
            Playlist {
                id: playlist_id.to_string(),
                name: "Existing".to_string(),
                url: format!("https://open.spotify.com/playlist/{}", playlist_id),
            },
        );
        self.playlist_tracks.lock().unwrap().insert(
            playlist_id.to_string(),
            track_ids.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    pub fn tracks_in(&self, playlist_id: &str) -> Vec<String> {
        self.playlist_tracks
            .lock()
            .unwrap()
            .get(playlist_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl StreamingCatalog for FakeStreaming {
    async fn search_albums(&self, query: &str) -> Result<Vec<StreamingAlbum>, StreamingError> {
        let count = {
            let mut calls = self.search_calls.lock().unwrap();
            calls.push(query.to_string());
            calls.len()
        };

        if let Some((after, token)) = &self.cancel_after_searches {
            if count >= *after {
                token.cancel();
            }
        }

        if matches!(self.unauthorized_from_search, Some(n) if count >= n) {
            return Err(StreamingError::Unauthorized("The access token expired".to_string()));
        }
        if self.failing_searches.contains(query) {
            return Err(StreamingError::NetworkError("connection reset".to_string()));
        }

        Ok(self.albums.get(query).cloned().unwrap_or_default())
    }

    async fn current_user(&self) -> Result<StreamingUser, StreamingError> {
        Ok(StreamingUser {
            id: "user-1".to_string(),
            display_name: Some("Test User".to_string()),
            country: None,
        })
    }

    async fn create_playlist(&self, _user_id: &str, name: &str) -> Result<Playlist, StreamingError> {
        let mut created = self.created_playlists.lock().unwrap();
        let id = format!("created-{}", created.len() + 1);
        let playlist = Playlist {
            id: id.clone(),
            name: name.to_string(),
            url: format!("https://open.spotify.com/playlist/{}", id),
        };
        created.push(playlist.clone());
        self.playlist_tracks.lock().unwrap().insert(id, Vec::new());
        Ok(playlist)
    }

    async fn get_playlist(&self, playlist_id: &str) -> Result<Playlist, StreamingError> {
        self.playlists
            .get(playlist_id)
            .cloned()
            .ok_or_else(|| StreamingError::NotFound(format!("playlist {}", playlist_id)))
    }

    async fn playlist_track_ids(&self, playlist_id: &str) -> Result<Vec<String>, StreamingError> {
        Ok(self.tracks_in(playlist_id))
    }

    async fn album_tracks(&self, album_id: &str) -> Result<Vec<Track>, StreamingError> {
        Ok(self.tracks.get(album_id).cloned().unwrap_or_default())
    }

    async fn append_tracks(&self, playlist_id: &str, uris: &[String]) -> Result<(), StreamingError> {
        let attempt = {
            let mut attempts = self.append_attempts.lock().unwrap();
            *attempts += 1;
            *attempts
        };
        if self.fail_appends || self.fail_append_call == Some(attempt) {
            return Err(StreamingError::ApiError(500, "Internal Server Error".to_string()));
        }

        self.append_calls
            .lock()
            .unwrap()
            .push((playlist_id.to_string(), uris.to_vec()));

        let mut playlists = self.playlist_tracks.lock().unwrap();
        let tracks = playlists.entry(playlist_id.to_string()).or_default();
        for uri in uris {
            tracks.push(uri.rsplit(':').next().unwrap_or(uri).to_string());
        }
        Ok(())
    }
}

/// Storefront returning canned hits per query
#[derive(Default)]
pub struct FakeStorefront {
    pub hits: HashMap<String, Vec<StorefrontHit>>,
    pub failing_queries: HashSet<String>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeStorefront {
    pub fn new() -> Self {
        Self::default()
    }

    /// An exact album hit for `release`, plus a same-titled track that must be filtered out
    pub fn with_album(mut self, release: &Release) -> Self {
        let hits = self.hits.entry(release.album.clone()).or_default();
        hits.push(StorefrontHit {
            item_type: "album".to_string(),
            name: release.album.clone(),
            artist: release.artist.clone(),
            url: format!("https://example.bandcamp.com/album/{}", release.album),
            image_url: None,
            release_date: None,
            tags: Vec::new(),
        });
        hits.push(StorefrontHit {
            item_type: "track".to_string(),
            name: release.album.clone(),
            artist: release.artist.clone(),
            url: format!("https://example.bandcamp.com/track/{}", release.album),
            image_url: None,
            release_date: None,
            tags: Vec::new(),
        });
        self
    }

    pub fn failing_on(mut self, query: &str) -> Self {
        self.failing_queries.insert(query.to_string());
        self
    }
}

#[async_trait]
impl Storefront for FakeStorefront {
    async fn search(&self, query: &str) -> Result<Vec<StorefrontHit>, StorefrontError> {
        self.calls.lock().unwrap().push(query.to_string());

        if self.failing_queries.contains(query) {
            return Err(StorefrontError::ApiError(502, "Bad Gateway".to_string()));
        }
        Ok(self.hits.get(query).cloned().unwrap_or_default())
    }
}

/// Client factory handing out the same fakes for every run
pub struct FakeClients {
    pub source: Arc<FakeReleaseSource>,
    pub streaming: Arc<FakeStreaming>,
    pub storefront: Arc<FakeStorefront>,
    pub tokens: Mutex<Vec<String>>,
}

impl FakeClients {
    pub fn new(source: FakeReleaseSource, streaming: FakeStreaming, storefront: FakeStorefront) -> Self {
        Self {
            source: Arc::new(source),
            streaming: Arc::new(streaming),
            storefront: Arc::new(storefront),
            tokens: Mutex::new(Vec::new()),
        }
    }
}

impl ClientFactory for FakeClients {
    fn release_source(&self) -> Arc<dyn ReleaseSource> {
        self.source.clone()
    }

    fn storefront(&self) -> Arc<dyn Storefront> {
        self.storefront.clone()
    }

    fn streaming(&self, access_token: &str) -> Result<Arc<dyn StreamingCatalog>, StreamingError> {
        self.tokens.lock().unwrap().push(access_token.to_string());
        Ok(self.streaming.clone())
    }
}

pub async fn memory_pool() -> SqlitePool {
    nmpm_builder::db::init_memory_pool()
        .await
        .expect("Failed to create in-memory database")
}

/// Pipeline over the fakes with no pacing
pub fn pipeline(
    pool: &SqlitePool,
    source: Arc<FakeReleaseSource>,
    streaming: Arc<FakeStreaming>,
    storefront: Arc<FakeStorefront>,
) -> ReconciliationPipeline {
    ReconciliationPipeline::new(
        CatalogFetcher::new(source),
        CatalogMatcher::new(streaming.clone(), storefront),
        PlaylistMutator::new(streaming),
        RunTracker::new(pool.clone()),
    )
    .with_pacing(Duration::ZERO)
}
