//! Build run orchestration
//!
//! Drives one run through its states:
//! IDLE → PLAYLIST_RESOLVING → FETCHING → FILTERING → PROCESSING(i) → COMPLETED | FAILED | CANCELLED
//!
//! Every run that was started ends with exactly one terminal tracker call,
//! which also clears the owner's active marker.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::clients::{CatalogError, StreamingError};
use crate::models::{
    BuildParameters, LookupFailure, LookupSource, PipelineState, Playlist, Release, ReleasePeriod,
    RunState, RunTotals, StateTransition,
};
use crate::services::catalog_fetcher::CatalogFetcher;
use crate::services::catalog_matcher::CatalogMatcher;
use crate::services::playlist_mutator::PlaylistMutator;
use crate::services::release_filter::filter_releases;
use crate::services::run_tracker::RunTracker;

/// Default pause after each processed release
pub const DEFAULT_PACING: Duration = Duration::from_millis(1000);

/// Conditions that end a run as FAILED (or keep it from starting)
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Invalid build parameters: {0}")]
    InvalidInput(String),

    #[error("No valid streaming credential for owner {0}")]
    MissingCredential(String),

    #[error("Playlist error: {0}")]
    Playlist(StreamingError),

    #[error("Release catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Streaming service error: {0}")]
    Streaming(StreamingError),

    #[error("Run tracking error: {0}")]
    Tracker(#[from] nmpm_common::Error),
}

/// Outcome of a finished run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub owner_id: String,
    pub run_key: String,
    pub state: RunState,
    pub playlist: Option<Playlist>,
    /// Releases left after filtering
    pub releases: usize,
    /// Entries persisted to the run record
    pub recorded_entries: usize,
    /// Entries processed but lost to bookkeeping failures
    pub unrecorded_entries: usize,
    pub totals: RunTotals,
    pub error: Option<String>,
    pub transitions: Vec<StateTransition>,
}

/// In-flight bookkeeping of one run
struct RunProgress {
    owner_id: String,
    run_key: String,
    state: PipelineState,
    transitions: Vec<StateTransition>,
    playlist: Option<Playlist>,
    releases: usize,
    recorded_entries: usize,
    unrecorded_entries: usize,
    totals: RunTotals,
}

impl RunProgress {
    fn new(owner_id: &str, run_key: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            run_key: run_key.to_string(),
            state: PipelineState::Idle,
            transitions: Vec::new(),
            playlist: None,
            releases: 0,
            recorded_entries: 0,
            unrecorded_entries: 0,
            totals: RunTotals::default(),
        }
    }

    fn transition_to(&mut self, new_state: PipelineState) {
        let transition = StateTransition {
            old_state: self.state,
            new_state,
            transitioned_at: Utc::now(),
        };
        self.state = new_state;

        match new_state {
            PipelineState::Processing(_) => tracing::debug!(
                owner_id = %self.owner_id,
                run_key = %self.run_key,
                old_state = ?transition.old_state,
                new_state = ?new_state,
                "Run state transition"
            ),
            _ => tracing::info!(
                owner_id = %self.owner_id,
                run_key = %self.run_key,
                old_state = ?transition.old_state,
                new_state = ?new_state,
                "Run state transition"
            ),
        }

        self.transitions.push(transition);
    }

    fn into_summary(self, state: RunState, error: Option<String>) -> RunSummary {
        RunSummary {
            owner_id: self.owner_id,
            run_key: self.run_key,
            state,
            playlist: self.playlist,
            releases: self.releases,
            recorded_entries: self.recorded_entries,
            unrecorded_entries: self.unrecorded_entries,
            totals: self.totals,
            error,
            transitions: self.transitions,
        }
    }
}

/// Sequential fetch → filter → match → append → record loop
pub struct ReconciliationPipeline {
    fetcher: CatalogFetcher,
    matcher: CatalogMatcher,
    mutator: PlaylistMutator,
    tracker: RunTracker,
    pacing: Duration,
}

impl ReconciliationPipeline {
    pub fn new(
        fetcher: CatalogFetcher,
        matcher: CatalogMatcher,
        mutator: PlaylistMutator,
        tracker: RunTracker,
    ) -> Self {
        Self {
            fetcher,
            matcher,
            mutator,
            tracker,
            pacing: DEFAULT_PACING,
        }
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn tracker(&self) -> &RunTracker {
        &self.tracker
    }

    /// Start a run and drive it to a terminal state
    pub async fn run(
        &self,
        owner_id: &str,
        run_key: &str,
        parameters: &BuildParameters,
        cancel: CancellationToken,
    ) -> Result<RunSummary, BuildError> {
        validate_parameters(parameters)?;
        self.tracker.start_run(owner_id, run_key, parameters).await?;
        self.execute_started(owner_id, run_key, parameters, cancel)
            .await
    }

    /// Drive a run whose record and marker were already written by `RunTracker::start_run`
    ///
    /// Returns `Ok` for COMPLETED and CANCELLED runs and `Err` for FAILED ones;
    /// in every case the run record is finished and the marker cleared.
    pub async fn execute_started(
        &self,
        owner_id: &str,
        run_key: &str,
        parameters: &BuildParameters,
        cancel: CancellationToken,
    ) -> Result<RunSummary, BuildError> {
        let mut progress = RunProgress::new(owner_id, run_key);

        match self.drive(&mut progress, parameters, &cancel).await {
            Ok(state) => {
                let (pipeline_state, run_state) = match state {
                    RunState::Cancelled => (PipelineState::Cancelled, RunState::Cancelled),
                    _ => (PipelineState::Completed, RunState::Completed),
                };
                progress.transition_to(pipeline_state);
                self.tracker.finish_run(owner_id, run_key, run_state).await?;

                tracing::info!(
                    owner_id = %owner_id,
                    run_key = %run_key,
                    state = run_state.as_str(),
                    releases = progress.releases,
                    recorded = progress.recorded_entries,
                    unrecorded = progress.unrecorded_entries,
                    streaming = progress.totals.streaming,
                    storefront = progress.totals.storefront,
                    tracks_added = progress.totals.tracks_added,
                    "Build run ended"
                );

                Ok(progress.into_summary(run_state, None))
            }
            Err(err) => {
                progress.transition_to(PipelineState::Failed);
                let message = err.to_string();

                tracing::error!(
                    owner_id = %owner_id,
                    run_key = %run_key,
                    error = %message,
                    recorded = progress.recorded_entries,
                    "Build run failed"
                );

                if let Err(finish_err) = self
                    .tracker
                    .finish_run_on_error(owner_id, run_key, &message)
                    .await
                {
                    tracing::error!(
                        owner_id = %owner_id,
                        run_key = %run_key,
                        error = %finish_err,
                        "Failed to record run failure"
                    );
                }

                Err(err)
            }
        }
    }

    /// Everything between start and the terminal tracker call
    ///
    /// `Ok` carries `Completed` or `Cancelled`.
    async fn drive(
        &self,
        progress: &mut RunProgress,
        parameters: &BuildParameters,
        cancel: &CancellationToken,
    ) -> Result<RunState, BuildError> {
        progress.transition_to(PipelineState::PlaylistResolving);
        let playlist = self
            .mutator
            .ensure_playlist(
                parameters.playlist.as_deref(),
                &parameters.dates,
                parameters.genre.as_deref(),
            )
            .await
            .map_err(BuildError::Playlist)?;
        self.tracker
            .attach_playlist(&progress.owner_id, &progress.run_key, &playlist)
            .await?;
        progress.playlist = Some(playlist.clone());

        if cancel.is_cancelled() {
            return Ok(RunState::Cancelled);
        }

        progress.transition_to(PipelineState::Fetching);
        let periods = ReleasePeriod::covering(&parameters.dates)
            .map_err(|e| BuildError::InvalidInput(e.to_string()))?;
        let candidates = self
            .fetcher
            .fetch_periods(&periods, parameters.genre_filter())
            .await?;

        progress.transition_to(PipelineState::Filtering);
        let releases = filter_releases(candidates, &parameters.dates, &parameters.ignore);
        progress.releases = releases.len();

        tracing::info!(
            owner_id = %progress.owner_id,
            run_key = %progress.run_key,
            releases = releases.len(),
            "Releases selected for matching"
        );

        let mut existing = self
            .mutator
            .snapshot_tracks(&playlist.id)
            .await
            .map_err(BuildError::Playlist)?;

        for (index, release) in releases.iter().enumerate() {
            if cancel.is_cancelled() {
                return Ok(RunState::Cancelled);
            }

            progress.transition_to(PipelineState::Processing(index));
            self.process_release(progress, release, &playlist.id, &mut existing)
                .await?;

            if !self.pacing.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(RunState::Cancelled),
                    _ = tokio::time::sleep(self.pacing) => {}
                }
            }
        }

        Ok(RunState::Completed)
    }

    /// Match, append and record one release
    ///
    /// Lookup and append failures stay on the entry; only a systemic streaming
    /// error is returned, after the entry is recorded.
    async fn process_release(
        &self,
        progress: &mut RunProgress,
        release: &Release,
        playlist_id: &str,
        existing: &mut HashSet<String>,
    ) -> Result<(), BuildError> {
        let outcome = self.matcher.match_release(release).await;
        let mut entry = outcome.entry;
        let mut systemic_error = outcome.systemic_error;

        let mut tracks_added = 0;
        if systemic_error.is_none() && !entry.streaming_hits.is_empty() {
            let appended = self
                .mutator
                .append_matches(&entry.streaming_hits, playlist_id, existing)
                .await;
            tracks_added = appended.appended;

            if let Some(e) = appended.error {
                tracing::warn!(
                    artist = %release.artist,
                    album = %release.album,
                    appended = tracks_added,
                    error = %e,
                    "Failed to append album tracks"
                );
                entry.lookup_failures.push(LookupFailure {
                    source: LookupSource::Playlist,
                    message: e.to_string(),
                });
                if e.is_systemic() {
                    systemic_error = Some(e);
                }
            }
        }

        // Persisted totals only ever cover recorded entries
        let mut totals = progress.totals;
        totals.add_entry(&entry, tracks_added);

        match self
            .tracker
            .record_entry(&progress.owner_id, &progress.run_key, &entry, &totals)
            .await
        {
            Ok(()) => {
                progress.totals = totals;
                progress.recorded_entries += 1;
            }
            Err(e) => {
                progress.unrecorded_entries += 1;
                tracing::error!(
                    owner_id = %progress.owner_id,
                    run_key = %progress.run_key,
                    artist = %release.artist,
                    album = %release.album,
                    tracks_added,
                    error = %e,
                    "Failed to record entry, continuing run"
                );
            }
        }

        match systemic_error {
            Some(e) => Err(BuildError::Streaming(e)),
            None => Ok(()),
        }
    }
}

/// Reject parameters a run cannot start with
pub fn validate_parameters(parameters: &BuildParameters) -> Result<(), BuildError> {
    if parameters.dates.is_empty() {
        return Err(BuildError::InvalidInput(
            "At least one release date is required".to_string(),
        ));
    }
    ReleasePeriod::covering(&parameters.dates)
        .map_err(|e| BuildError::InvalidInput(e.to_string()))?;
    Ok(())
}
