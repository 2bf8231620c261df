//! Build run persistence
//!
//! Run records, their ordered entries, and the per-owner active-run marker.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use nmpm_common::{Error, Result};

use crate::models::{
    ActiveRun, BuildParameters, MatchEntry, Playlist, RunListing, RunRecord, RunState, RunTotals,
};

fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

fn parse_state(value: &str) -> Result<RunState> {
    RunState::parse(value).ok_or_else(|| Error::Internal(format!("Unknown run state: {}", value)))
}

/// Unique-key violations become `Conflict`, everything else stays a database error
fn conflict_or(err: sqlx::Error, message: String) -> Error {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => Error::Conflict(message),
        _ => Error::Database(err),
    }
}

/// Create the run record and set the owner's active marker atomically
///
/// Fails if the owner already has an active run or the run key is taken.
pub async fn insert_run(
    pool: &SqlitePool,
    owner_id: &str,
    run_key: &str,
    parameters: &BuildParameters,
    started_at: DateTime<Utc>,
) -> Result<()> {
    let parameters = serde_json::to_string(parameters)
        .map_err(|e| Error::Internal(format!("Failed to serialize parameters: {}", e)))?;
    let started_at = started_at.to_rfc3339();

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO build_runs (owner_id, run_key, state, parameters, started_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(owner_id)
    .bind(run_key)
    .bind(RunState::Running.as_str())
    .bind(&parameters)
    .bind(&started_at)
    .execute(&mut *tx)
    .await
    .map_err(|e| conflict_or(e, format!("Run {}/{} already exists", owner_id, run_key)))?;

    sqlx::query("INSERT INTO active_runs (owner_id, run_key, started_at) VALUES (?, ?, ?)")
        .bind(owner_id)
        .bind(run_key)
        .bind(&started_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_or(e, format!("Owner {} already has an active run", owner_id)))?;

    tx.commit().await?;
    Ok(())
}

/// Record the resolved target playlist of a run
pub async fn set_playlist(
    pool: &SqlitePool,
    owner_id: &str,
    run_key: &str,
    playlist: &Playlist,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE build_runs
        SET playlist_id = ?, playlist_name = ?, playlist_url = ?
        WHERE owner_id = ? AND run_key = ?
        "#,
    )
    .bind(&playlist.id)
    .bind(&playlist.name)
    .bind(&playlist.url)
    .bind(owner_id)
    .bind(run_key)
    .execute(pool)
    .await?;

    Ok(())
}

/// Append one entry after the existing ones and rewrite the totals
pub async fn append_entry(
    pool: &SqlitePool,
    owner_id: &str,
    run_key: &str,
    entry: &MatchEntry,
    totals: &RunTotals,
) -> Result<()> {
    let entry = serde_json::to_string(entry)
        .map_err(|e| Error::Internal(format!("Failed to serialize entry: {}", e)))?;

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO run_entries (owner_id, run_key, seq, entry)
        VALUES (?, ?, (
            SELECT COALESCE(MAX(seq) + 1, 0) FROM run_entries WHERE owner_id = ? AND run_key = ?
        ), ?)
        "#,
    )
    .bind(owner_id)
    .bind(run_key)
    .bind(owner_id)
    .bind(run_key)
    .bind(&entry)
    .execute(&mut *tx)
    .await?;

    let updated = sqlx::query(
        r#"
        UPDATE build_runs
        SET streaming_total = ?, storefront_total = ?, tracks_added = ?
        WHERE owner_id = ? AND run_key = ?
        "#,
    )
    .bind(totals.streaming as i64)
    .bind(totals.storefront as i64)
    .bind(totals.tracks_added as i64)
    .bind(owner_id)
    .bind(run_key)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Run {}/{}", owner_id, run_key)));
    }

    tx.commit().await?;
    Ok(())
}

/// Move a run to a terminal state and clear the owner's active marker
///
/// The marker is deleted whichever run key it holds.
pub async fn finish_run(
    pool: &SqlitePool,
    owner_id: &str,
    run_key: &str,
    state: RunState,
    error: Option<&str>,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE build_runs
        SET state = ?, error = COALESCE(?, error), ended_at = ?
        WHERE owner_id = ? AND run_key = ?
        "#,
    )
    .bind(state.as_str())
    .bind(error)
    .bind(Utc::now().to_rfc3339())
    .bind(owner_id)
    .bind(run_key)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM active_runs WHERE owner_id = ?")
        .bind(owner_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Delete the owner's active marker only
pub async fn clear_active_marker(pool: &SqlitePool, owner_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM active_runs WHERE owner_id = ?")
        .bind(owner_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Load the full run record with its entries in processing order
pub async fn load_run(pool: &SqlitePool, owner_id: &str, run_key: &str) -> Result<Option<RunRecord>> {
    let row = sqlx::query(
        r#"
        SELECT state, parameters, playlist_id, playlist_name, playlist_url,
               streaming_total, storefront_total, tracks_added, error,
               started_at, ended_at
        FROM build_runs
        WHERE owner_id = ? AND run_key = ?
        "#,
    )
    .bind(owner_id)
    .bind(run_key)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let state: String = row.get("state");
    let state = parse_state(&state)?;

    let parameters: String = row.get("parameters");
    let parameters: BuildParameters = serde_json::from_str(&parameters)
        .map_err(|e| Error::Internal(format!("Failed to deserialize parameters: {}", e)))?;

    let started_at: String = row.get("started_at");
    let started_at = parse_timestamp(&started_at, "started_at")?;

    let ended_at: Option<String> = row.get("ended_at");
    let ended_at = ended_at
        .map(|s| parse_timestamp(&s, "ended_at"))
        .transpose()?;

    let entries = load_entries(pool, owner_id, run_key).await?;

    Ok(Some(RunRecord {
        owner_id: owner_id.to_string(),
        run_key: run_key.to_string(),
        state,
        date: parameters.first_date().unwrap_or_default().to_string(),
        days: parameters.days(),
        genre: parameters.genre.clone(),
        ignore: parameters.ignore.clone(),
        parameters,
        playlist: row.get("playlist_id"),
        playlist_name: row.get("playlist_name"),
        playlist_url: row.get("playlist_url"),
        entries,
        streaming_total: row.get::<i64, _>("streaming_total") as usize,
        storefront_total: row.get::<i64, _>("storefront_total") as usize,
        tracks_added: row.get::<i64, _>("tracks_added") as usize,
        error: row.get("error"),
        started_at,
        ended_at,
    }))
}

/// Entries of a run ordered by sequence number
pub async fn load_entries(pool: &SqlitePool, owner_id: &str, run_key: &str) -> Result<Vec<MatchEntry>> {
    let rows: Vec<String> = sqlx::query_scalar(
        "SELECT entry FROM run_entries WHERE owner_id = ? AND run_key = ? ORDER BY seq",
    )
    .bind(owner_id)
    .bind(run_key)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|entry| {
            serde_json::from_str(entry)
                .map_err(|e| Error::Internal(format!("Failed to deserialize entry: {}", e)))
        })
        .collect()
}

/// All runs of an owner, newest first
pub async fn list_runs(pool: &SqlitePool, owner_id: &str) -> Result<Vec<RunListing>> {
    let rows = sqlx::query(
        r#"
        SELECT run_key, state, parameters, playlist_name, started_at
        FROM build_runs
        WHERE owner_id = ?
        ORDER BY started_at DESC
        "#,
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let state: String = row.get("state");
            let parameters: String = row.get("parameters");
            let parameters: BuildParameters = serde_json::from_str(&parameters)
                .map_err(|e| Error::Internal(format!("Failed to deserialize parameters: {}", e)))?;
            let started_at: String = row.get("started_at");

            Ok(RunListing {
                run_key: row.get("run_key"),
                state: parse_state(&state)?,
                date: parameters.first_date().unwrap_or_default().to_string(),
                playlist_name: row.get("playlist_name"),
                started_at: parse_timestamp(&started_at, "started_at")?,
            })
        })
        .collect()
}

/// The owner's active-run marker, if any
pub async fn active_run(pool: &SqlitePool, owner_id: &str) -> Result<Option<ActiveRun>> {
    let row = sqlx::query("SELECT run_key, started_at FROM active_runs WHERE owner_id = ?")
        .bind(owner_id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => {
            let started_at: String = row.get("started_at");
            Ok(Some(ActiveRun {
                owner_id: owner_id.to_string(),
                run_key: row.get("run_key"),
                started_at: parse_timestamp(&started_at, "started_at")?,
            }))
        }
        None => Ok(None),
    }
}

/// Fail every RUNNING record and clear all markers
///
/// A run lives in a task of the process that started it; after a restart no
/// task exists to finish it.
pub async fn fail_interrupted_runs(pool: &SqlitePool) -> Result<usize> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        r#"
        UPDATE build_runs
        SET state = ?, ended_at = ?, error = 'Run interrupted - builder was restarted'
        WHERE state = ?
        "#,
    )
    .bind(RunState::Failed.as_str())
    .bind(Utc::now().to_rfc3339())
    .bind(RunState::Running.as_str())
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM active_runs").execute(&mut *tx).await?;

    tx.commit().await?;
    Ok(result.rows_affected() as usize)
}
