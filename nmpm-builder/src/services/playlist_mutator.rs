//! Target playlist resolution and idempotent track appends

use std::collections::HashSet;
use std::sync::Arc;

use crate::clients::spotify::MAX_URIS_PER_APPEND;
use crate::clients::{StreamingCatalog, StreamingError};
use crate::models::{Playlist, StreamingAlbum, ANY_GENRE};

/// Playlist name prefix for created playlists
const PLAYLIST_NAME_PREFIX: &str = "Metal";

/// Name of a newly created playlist: `Metal - {genre} - {first date}`
///
/// The genre part is left out when absent or the wildcard.
pub fn playlist_name(first_date: &str, genre: Option<&str>) -> String {
    match genre.map(str::trim).filter(|g| !g.is_empty() && *g != ANY_GENRE) {
        Some(genre) => format!("{} - {} - {}", PLAYLIST_NAME_PREFIX, genre, first_date),
        None => format!("{} - {}", PLAYLIST_NAME_PREFIX, first_date),
    }
}

/// Resolves the run's playlist and appends matched albums to it
pub struct PlaylistMutator {
    streaming: Arc<dyn StreamingCatalog>,
}

impl PlaylistMutator {
    pub fn new(streaming: Arc<dyn StreamingCatalog>) -> Self {
        Self { streaming }
    }

    /// Fetch `existing` when given, otherwise create a playlist for the current user
    pub async fn ensure_playlist(
        &self,
        existing: Option<&str>,
        dates: &[String],
        genre: Option<&str>,
    ) -> Result<Playlist, StreamingError> {
        if let Some(playlist_id) = existing.filter(|id| !id.trim().is_empty()) {
            let playlist = self.streaming.get_playlist(playlist_id).await?;
            tracing::info!(playlist_id = %playlist.id, name = %playlist.name, "Using existing playlist");
            return Ok(playlist);
        }

        let first_date = dates.first().map(String::as_str).unwrap_or_default();
        let name = playlist_name(first_date, genre);

        let user = self.streaming.current_user().await?;
        let playlist = self.streaming.create_playlist(&user.id, &name).await?;

        tracing::info!(
            playlist_id = %playlist.id,
            name = %playlist.name,
            user_id = %user.id,
            "Created playlist"
        );

        Ok(playlist)
    }

    /// Ids of the tracks already in the playlist
    pub async fn snapshot_tracks(&self, playlist_id: &str) -> Result<HashSet<String>, StreamingError> {
        let ids: HashSet<String> = self
            .streaming
            .playlist_track_ids(playlist_id)
            .await?
            .into_iter()
            .collect();

        tracing::debug!(playlist_id = %playlist_id, tracks = ids.len(), "Playlist snapshot taken");
        Ok(ids)
    }

    /// Append every track of `albums` not yet in `existing`
    ///
    /// Ids are added to `existing` batch by batch, so a failed batch leaves
    /// the earlier ones accounted for. Stops at the first failure.
    pub async fn append_matches(
        &self,
        albums: &[StreamingAlbum],
        playlist_id: &str,
        existing: &mut HashSet<String>,
    ) -> AppendOutcome {
        let mut outcome = AppendOutcome::default();

        for album in albums {
            if let Err(e) = self
                .append_album(album, playlist_id, existing, &mut outcome.appended)
                .await
            {
                outcome.error = Some(e);
                break;
            }
        }

        outcome
    }

    async fn append_album(
        &self,
        album: &StreamingAlbum,
        playlist_id: &str,
        existing: &mut HashSet<String>,
        appended: &mut usize,
    ) -> Result<(), StreamingError> {
        let tracks = self.streaming.album_tracks(&album.id).await?;

        let mut pending: Vec<(String, String)> = Vec::new();
        for track in tracks {
            // Also guards against the same track twice on one album
            if existing.contains(&track.id) || pending.iter().any(|(id, _)| *id == track.id) {
                continue;
            }
            pending.push((track.id, track.uri));
        }

        if pending.is_empty() {
            tracing::debug!(album_id = %album.id, "Album already in playlist");
            return Ok(());
        }

        for batch in pending.chunks(MAX_URIS_PER_APPEND) {
            let uris: Vec<String> = batch.iter().map(|(_, uri)| uri.clone()).collect();
            self.streaming.append_tracks(playlist_id, &uris).await?;

            *appended += batch.len();
            existing.extend(batch.iter().map(|(id, _)| id.clone()));
        }

        tracing::debug!(
            album_id = %album.id,
            album = %album.name,
            tracks = pending.len(),
            "Appended album tracks"
        );
        Ok(())
    }
}

/// Result of one `append_matches` call
#[derive(Debug, Default)]
pub struct AppendOutcome {
    /// Tracks that went into the playlist, including those before a failure
    pub appended: usize,
    pub error: Option<StreamingError>,
}
