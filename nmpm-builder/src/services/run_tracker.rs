//! Durable run bookkeeping
//!
//! Thin service over `db::runs` that owns the pool and applies lock retry to
//! the per-release writes.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use nmpm_common::Result;

use crate::db::runs;
use crate::models::{
    ActiveRun, BuildParameters, MatchEntry, Playlist, RunListing, RunRecord, RunState, RunTotals,
};
use crate::utils::retry_on_lock;

/// Upper bound on lock-contention retries per write
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

/// Records run lifecycle, entries and the per-owner active marker
#[derive(Clone)]
pub struct RunTracker {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl RunTracker {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    /// Write the RUNNING record and set the owner's active marker
    ///
    /// Returns `Error::Conflict` when the owner already has an active run.
    pub async fn start_run(
        &self,
        owner_id: &str,
        run_key: &str,
        parameters: &BuildParameters,
    ) -> Result<DateTime<Utc>> {
        let started_at = Utc::now();
        runs::insert_run(&self.pool, owner_id, run_key, parameters, started_at).await?;

        tracing::info!(
            owner_id = %owner_id,
            run_key = %run_key,
            dates = parameters.days(),
            genre = %parameters.genre_filter(),
            "Build run started"
        );

        Ok(started_at)
    }

    pub async fn attach_playlist(
        &self,
        owner_id: &str,
        run_key: &str,
        playlist: &Playlist,
    ) -> Result<()> {
        retry_on_lock("attach_playlist", self.max_lock_wait_ms, || {
            runs::set_playlist(&self.pool, owner_id, run_key, playlist)
        })
        .await
    }

    /// Append one entry and rewrite the running totals
    pub async fn record_entry(
        &self,
        owner_id: &str,
        run_key: &str,
        entry: &MatchEntry,
        totals: &RunTotals,
    ) -> Result<()> {
        retry_on_lock("record_entry", self.max_lock_wait_ms, || {
            runs::append_entry(&self.pool, owner_id, run_key, entry, totals)
        })
        .await
    }

    /// Set a terminal state and clear the owner's marker
    pub async fn finish_run(&self, owner_id: &str, run_key: &str, state: RunState) -> Result<()> {
        self.finish(owner_id, run_key, state, None).await
    }

    /// Mark the run FAILED with `error` and clear the owner's marker
    pub async fn finish_run_on_error(&self, owner_id: &str, run_key: &str, error: &str) -> Result<()> {
        self.finish(owner_id, run_key, RunState::Failed, Some(error))
            .await
    }

    async fn finish(
        &self,
        owner_id: &str,
        run_key: &str,
        state: RunState,
        error: Option<&str>,
    ) -> Result<()> {
        let result = retry_on_lock("finish_run", self.max_lock_wait_ms, || {
            runs::finish_run(&self.pool, owner_id, run_key, state, error)
        })
        .await;

        if let Err(e) = result {
            // The marker must not outlive the run, even if the record update failed
            tracing::error!(
                owner_id = %owner_id,
                run_key = %run_key,
                error = %e,
                "Failed to finish run record, clearing active marker"
            );
            runs::clear_active_marker(&self.pool, owner_id).await?;
            return Err(e);
        }

        tracing::info!(
            owner_id = %owner_id,
            run_key = %run_key,
            state = state.as_str(),
            "Build run finished"
        );
        Ok(())
    }

    pub async fn load_run(&self, owner_id: &str, run_key: &str) -> Result<Option<RunRecord>> {
        runs::load_run(&self.pool, owner_id, run_key).await
    }

    pub async fn list_runs(&self, owner_id: &str) -> Result<Vec<RunListing>> {
        runs::list_runs(&self.pool, owner_id).await
    }

    pub async fn active_run(&self, owner_id: &str) -> Result<Option<ActiveRun>> {
        runs::active_run(&self.pool, owner_id).await
    }

    /// Fail runs left RUNNING by a previous process
    pub async fn recover_interrupted_runs(&self) -> Result<usize> {
        let count = runs::fail_interrupted_runs(&self.pool).await?;
        if count > 0 {
            tracing::warn!(count, "Marked interrupted build runs as failed");
        }
        Ok(count)
    }
}
