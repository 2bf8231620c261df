//! Spotify Web API client
//!
//! Every call carries the owner's bearer token. Requests are paced by a
//! `governor` limiter and a 429 answer is retried after its `Retry-After`.

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::num::NonZeroU32;
use std::time::Duration;

use super::{StreamingCatalog, StreamingError};
use crate::models::{Playlist, StreamingAlbum, StreamingUser, Track};

const SPOTIFY_API_BASE: &str = "https://api.spotify.com/v1";

/// Maximum URIs accepted by one "add items to playlist" call
pub const MAX_URIS_PER_APPEND: usize = 100;

const PLAYLIST_PAGE_LIMIT: usize = 100;
const ALBUM_TRACKS_PAGE_LIMIT: usize = 50;
const SEARCH_LIMIT: usize = 20;
const MAX_RATE_LIMIT_RETRIES: u32 = 3;
const MAX_RETRY_AFTER_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct Paging<T> {
    items: Vec<T>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    albums: Paging<ApiAlbum>,
}

#[derive(Debug, Deserialize)]
struct ApiArtist {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ExternalUrls {
    spotify: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiAlbum {
    id: String,
    name: String,
    uri: String,
    #[serde(default)]
    artists: Vec<ApiArtist>,
    #[serde(default)]
    external_urls: ExternalUrls,
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiPlaylist {
    id: String,
    name: String,
    #[serde(default)]
    external_urls: ExternalUrls,
}

#[derive(Debug, Deserialize)]
struct ApiTrack {
    id: Option<String>,
    uri: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    track: Option<PlaylistItemTrack>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItemTrack {
    id: Option<String>,
}

impl From<ApiAlbum> for StreamingAlbum {
    fn from(album: ApiAlbum) -> Self {
        Self {
            id: album.id,
            name: album.name,
            artists: album.artists.into_iter().map(|a| a.name).collect(),
            uri: album.uri,
            external_url: album.external_urls.spotify,
            release_date: album.release_date,
        }
    }
}

impl From<ApiPlaylist> for Playlist {
    fn from(playlist: ApiPlaylist) -> Self {
        let url = playlist
            .external_urls
            .spotify
            .unwrap_or_else(|| format!("https://open.spotify.com/playlist/{}", playlist.id));
        Self {
            id: playlist.id,
            name: playlist.name,
            url,
        }
    }
}

/// Spotify API client bound to one bearer token
pub struct SpotifyClient {
    http_client: reqwest::Client,
    base_url: String,
    access_token: String,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl SpotifyClient {
    pub fn new(access_token: String) -> Result<Self, StreamingError> {
        Self::with_base_url(access_token, SPOTIFY_API_BASE)
    }

    pub fn with_base_url(access_token: String, base_url: &str) -> Result<Self, StreamingError> {
        if access_token.trim().is_empty() {
            return Err(StreamingError::Unauthorized(
                "Missing access token".to_string(),
            ));
        }

        let http_client = reqwest::Client::builder()
            .user_agent(nmpm_common::config::user_agent())
            .timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| StreamingError::NetworkError(e.to_string()))?;

        let rate_limiter =
            RateLimiter::direct(Quota::per_second(NonZeroU32::new(10).expect("10 is non-zero")));

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
            rate_limiter,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request, retrying on 429, and map error statuses
    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, StreamingError> {
        let request = request.bearer_auth(&self.access_token);
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.rate_limiter.until_ready().await;

            let builder = request
                .try_clone()
                .ok_or_else(|| StreamingError::NetworkError("Request not retryable".to_string()))?;
            let response = builder
                .send()
                .await
                .map_err(|e| StreamingError::NetworkError(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            match status {
                StatusCode::UNAUTHORIZED => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(StreamingError::Unauthorized(body));
                }
                StatusCode::NOT_FOUND => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(StreamingError::NotFound(body));
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    if attempt > MAX_RATE_LIMIT_RETRIES {
                        return Err(StreamingError::RateLimitExceeded);
                    }
                    let retry_after = response
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .unwrap_or(1)
                        .min(MAX_RETRY_AFTER_SECS);
                    tracing::warn!(attempt, retry_after, "Streaming API rate limited, backing off");
                    tokio::time::sleep(Duration::from_secs(retry_after)).await;
                }
                _ => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(StreamingError::ApiError(status.as_u16(), body));
                }
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, StreamingError> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| StreamingError::ParseError(e.to_string()))
    }

    /// Follow `next` links until the listing is exhausted
    async fn get_all_pages<T: DeserializeOwned>(&self, first_url: String) -> Result<Vec<T>, StreamingError> {
        let mut items = Vec::new();
        let mut next = Some(first_url);

        while let Some(url) = next {
            let page: Paging<T> = self.get_json(self.http_client.get(&url)).await?;
            items.extend(page.items);
            next = page.next;
        }

        Ok(items)
    }
}

#[async_trait]
impl StreamingCatalog for SpotifyClient {
    async fn search_albums(&self, query: &str) -> Result<Vec<StreamingAlbum>, StreamingError> {
        tracing::debug!(query = %query, "Searching streaming catalog");

        let limit = SEARCH_LIMIT.to_string();
        let request = self
            .http_client
            .get(self.url("/search"))
            .query(&[("q", query), ("type", "album"), ("limit", limit.as_str())]);

        let response: SearchResponse = self.get_json(request).await?;
        Ok(response.albums.items.into_iter().map(StreamingAlbum::from).collect())
    }

    async fn current_user(&self) -> Result<StreamingUser, StreamingError> {
        self.get_json(self.http_client.get(self.url("/me"))).await
    }

    async fn create_playlist(&self, user_id: &str, name: &str) -> Result<Playlist, StreamingError> {
        let request = self
            .http_client
            .post(self.url(&format!("/users/{}/playlists", user_id)))
            .json(&json!({ "name": name }));

        let playlist: ApiPlaylist = self.get_json(request).await?;
        tracing::info!(playlist_id = %playlist.id, name = %playlist.name, "Created playlist");
        Ok(playlist.into())
    }

    async fn get_playlist(&self, playlist_id: &str) -> Result<Playlist, StreamingError> {
        let request = self
            .http_client
            .get(self.url(&format!("/playlists/{}", playlist_id)))
            .query(&[("fields", "id,name,external_urls")]);

        let playlist: ApiPlaylist = self.get_json(request).await?;
        Ok(playlist.into())
    }

    async fn playlist_track_ids(&self, playlist_id: &str) -> Result<Vec<String>, StreamingError> {
        let first = format!(
            "{}/playlists/{}/tracks?fields=items(track(id)),next&limit={}",
            self.base_url, playlist_id, PLAYLIST_PAGE_LIMIT
        );
        let items: Vec<PlaylistItem> = self.get_all_pages(first).await?;

        // Local files and removed tracks come back without an id
        Ok(items
            .into_iter()
            .filter_map(|item| item.track.and_then(|t| t.id))
            .collect())
    }

    async fn album_tracks(&self, album_id: &str) -> Result<Vec<Track>, StreamingError> {
        let first = format!(
            "{}/albums/{}/tracks?limit={}",
            self.base_url, album_id, ALBUM_TRACKS_PAGE_LIMIT
        );
        let tracks: Vec<ApiTrack> = self.get_all_pages(first).await?;

        Ok(tracks
            .into_iter()
            .filter_map(|t| {
                t.id.map(|id| Track {
                    id,
                    uri: t.uri,
                    name: t.name,
                })
            })
            .collect())
    }

    async fn append_tracks(&self, playlist_id: &str, uris: &[String]) -> Result<(), StreamingError> {
        for chunk in uris.chunks(MAX_URIS_PER_APPEND) {
            let request = self
                .http_client
                .post(self.url(&format!("/playlists/{}/tracks", playlist_id)))
                .json(&json!({ "uris": chunk }));
            self.send(request).await?;

            tracing::debug!(playlist_id = %playlist_id, count = chunk.len(), "Appended tracks");
        }
        Ok(())
    }
}
