//! Build run API handlers
//!
//! POST /builds, GET /builds/:owner_id, GET /builds/:owner_id/active,
//! GET /builds/:owner_id/:run_key, POST /builds/:owner_id/:run_key/cancel

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    db,
    error::{ApiError, ApiResult},
    models::{ActiveRun, BuildParameters, RunListing, RunRecord, RunState},
    services::{
        expand_dates, reconciliation_pipeline::validate_parameters, CatalogFetcher,
        CatalogMatcher, PlaylistMutator, ReconciliationPipeline, RunTracker,
    },
    AppState,
};

/// Upper bound on the `days` of one build
pub const MAX_DAYS: u32 = 31;

fn default_days() -> u32 {
    1
}

/// POST /builds request
#[derive(Debug, Deserialize)]
pub struct StartBuildRequest {
    pub owner_id: String,
    /// Caller-chosen run key; generated when absent
    #[serde(default)]
    pub run_key: Option<String>,
    /// First release date, `YYYY-MM-DD`
    pub date: String,
    #[serde(default = "default_days")]
    pub days: u32,
    #[serde(default)]
    pub genre: Option<String>,
    /// Comma separated artist names
    #[serde(default)]
    pub ignore: Option<String>,
    /// Existing playlist id to extend
    #[serde(default)]
    pub playlist: Option<String>,
}

impl StartBuildRequest {
    /// Validate the request and enumerate its dates
    pub fn to_parameters(&self) -> ApiResult<BuildParameters> {
        if self.owner_id.trim().is_empty() {
            return Err(ApiError::BadRequest("owner_id is required".to_string()));
        }
        if self.days == 0 || self.days > MAX_DAYS {
            return Err(ApiError::BadRequest(format!(
                "days must be between 1 and {}",
                MAX_DAYS
            )));
        }

        let start = NaiveDate::parse_from_str(self.date.trim(), "%Y-%m-%d")
            .map_err(|e| ApiError::BadRequest(format!("Invalid date '{}': {}", self.date, e)))?;

        let ignore = self
            .ignore
            .as_deref()
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(BuildParameters {
            dates: expand_dates(start, self.days),
            genre: non_empty(self.genre.as_deref()),
            ignore,
            playlist: non_empty(self.playlist.as_deref()),
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// POST /builds response
#[derive(Debug, Serialize)]
pub struct StartBuildResponse {
    pub owner_id: String,
    pub run_key: String,
    pub state: RunState,
    pub dates: Vec<String>,
    pub started_at: DateTime<Utc>,
}

/// GET /builds/:owner_id response
#[derive(Debug, Serialize)]
pub struct RunListResponse {
    pub owner_id: String,
    pub runs: Vec<RunListing>,
}

/// GET /builds/:owner_id/:run_key response
#[derive(Debug, Serialize)]
pub struct RunStatusResponse {
    #[serde(flatten)]
    pub record: RunRecord,
    /// True while this run holds the owner's active marker
    pub running: bool,
}

/// POST /builds/:owner_id/:run_key/cancel response
#[derive(Debug, Serialize)]
pub struct CancelBuildResponse {
    pub owner_id: String,
    pub run_key: String,
    pub cancel_requested_at: DateTime<Utc>,
}

/// POST /builds
///
/// Start a run in the background. Returns 202 Accepted with the run key.
pub async fn start_build(
    State(state): State<AppState>,
    Json(request): Json<StartBuildRequest>,
) -> ApiResult<(StatusCode, Json<StartBuildResponse>)> {
    let parameters = request.to_parameters()?;
    validate_parameters(&parameters)?;

    let owner_id = request.owner_id.trim().to_string();
    let run_key = non_empty(request.run_key.as_deref()).unwrap_or_else(|| Uuid::new_v4().to_string());

    let access_token = db::credentials::valid_access_token(&state.db, &owner_id)
        .await?
        .ok_or_else(|| {
            ApiError::Unauthorized(format!("No valid streaming credential for owner {}", owner_id))
        })?;

    if let Some(active) = db::runs::active_run(&state.db, &owner_id).await? {
        return Err(ApiError::Conflict(format!(
            "Build {} already running for owner {}",
            active.run_key, owner_id
        )));
    }

    let streaming = state
        .clients
        .streaming(&access_token)
        .map_err(|e| ApiError::Unauthorized(e.to_string()))?;

    let tracker = RunTracker::new(state.db.clone());
    let pipeline = ReconciliationPipeline::new(
        CatalogFetcher::new(state.clients.release_source()),
        CatalogMatcher::new(streaming.clone(), state.clients.storefront()),
        PlaylistMutator::new(streaming),
        tracker.clone(),
    )
    .with_pacing(state.pacing);

    // The marker's primary key rejects a concurrent start that slipped past the check above
    let started_at = tracker.start_run(&owner_id, &run_key, &parameters).await?;

    let cancel = CancellationToken::new();
    state
        .cancellation_tokens
        .write()
        .await
        .insert((owner_id.clone(), run_key.clone()), cancel.clone());

    let response = StartBuildResponse {
        owner_id: owner_id.clone(),
        run_key: run_key.clone(),
        state: RunState::Running,
        dates: parameters.dates.clone(),
        started_at,
    };

    spawn_build(state, pipeline, tracker, owner_id, run_key, parameters, cancel);

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Run the pipeline in the background and clean up after it, even on panic
fn spawn_build(
    state: AppState,
    pipeline: ReconciliationPipeline,
    tracker: RunTracker,
    owner_id: String,
    run_key: String,
    parameters: BuildParameters,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let task = {
            let owner_id = owner_id.clone();
            let run_key = run_key.clone();
            tokio::spawn(async move {
                pipeline
                    .execute_started(&owner_id, &run_key, &parameters, cancel)
                    .await
            })
        };

        match task.await {
            Ok(Ok(summary)) => {
                tracing::info!(
                    owner_id = %owner_id,
                    run_key = %run_key,
                    state = summary.state.as_str(),
                    recorded = summary.recorded_entries,
                    unrecorded = summary.unrecorded_entries,
                    "Background build task completed"
                );
            }
            Ok(Err(e)) => {
                *state.last_error.write().await = Some(e.to_string());
            }
            Err(join_err) => {
                let message = format!("Build task aborted: {}", join_err);
                tracing::error!(owner_id = %owner_id, run_key = %run_key, error = %message, "Background build task panicked");
                if let Err(e) = tracker
                    .finish_run_on_error(&owner_id, &run_key, &message)
                    .await
                {
                    tracing::error!(owner_id = %owner_id, run_key = %run_key, error = %e, "Failed to record aborted run");
                }
                *state.last_error.write().await = Some(message);
            }
        }

        state
            .cancellation_tokens
            .write()
            .await
            .remove(&(owner_id, run_key));
    });
}

/// GET /builds/:owner_id
pub async fn list_builds(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
) -> ApiResult<Json<RunListResponse>> {
    let runs = db::runs::list_runs(&state.db, &owner_id).await?;
    Ok(Json(RunListResponse { owner_id, runs }))
}

/// GET /builds/:owner_id/active
pub async fn get_active_build(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
) -> ApiResult<Json<ActiveRun>> {
    db::runs::active_run(&state.db, &owner_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No active build for owner {}", owner_id)))
}

/// GET /builds/:owner_id/:run_key
pub async fn get_build(
    State(state): State<AppState>,
    Path((owner_id, run_key)): Path<(String, String)>,
) -> ApiResult<Json<RunStatusResponse>> {
    let record = db::runs::load_run(&state.db, &owner_id, &run_key)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Build not found: {}/{}", owner_id, run_key)))?;

    let running = match db::runs::active_run(&state.db, &owner_id).await? {
        Some(active) => active.run_key == run_key && record.state == RunState::Running,
        None => false,
    };

    tracing::debug!(owner_id = %owner_id, run_key = %run_key, state = record.state.as_str(), "Status query");

    Ok(Json(RunStatusResponse { record, running }))
}

/// POST /builds/:owner_id/:run_key/cancel
///
/// Signals the run; it ends as CANCELLED before its next release.
pub async fn cancel_build(
    State(state): State<AppState>,
    Path((owner_id, run_key)): Path<(String, String)>,
) -> ApiResult<Json<CancelBuildResponse>> {
    let record = db::runs::load_run(&state.db, &owner_id, &run_key)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Build not found: {}/{}", owner_id, run_key)))?;

    if record.state.is_terminal() {
        return Err(ApiError::BadRequest(format!(
            "Build already in terminal state: {}",
            record.state.as_str()
        )));
    }

    let tokens = state.cancellation_tokens.read().await;
    let token = tokens
        .get(&(owner_id.clone(), run_key.clone()))
        .ok_or_else(|| {
            ApiError::NotFound(format!("Build {}/{} is not running in this service", owner_id, run_key))
        })?;
    token.cancel();

    tracing::info!(owner_id = %owner_id, run_key = %run_key, "Build cancellation requested");

    Ok(Json(CancelBuildResponse {
        owner_id,
        run_key,
        cancel_requested_at: Utc::now(),
    }))
}

/// Build run routes
pub fn build_routes() -> Router<AppState> {
    Router::new()
        .route("/builds", post(start_build))
        .route("/builds/:owner_id", get(list_builds))
        .route("/builds/:owner_id/active", get(get_active_build))
        .route("/builds/:owner_id/:run_key", get(get_build))
        .route("/builds/:owner_id/:run_key/cancel", post(cancel_build))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(date: &str, days: u32) -> StartBuildRequest {
        StartBuildRequest {
            owner_id: "owner-1".to_string(),
            run_key: None,
            date: date.to_string(),
            days,
            genre: Some(" ".to_string()),
            ignore: Some("Foo, Bar,,".to_string()),
            playlist: None,
        }
    }

    #[test]
    fn test_request_enumerates_dates_and_splits_ignore_list() {
        let parameters = request("2024-03-30", 3).to_parameters().unwrap();

        assert_eq!(
            parameters.dates,
            vec!["2024-03-30", "2024-03-31", "2024-04-01"]
        );
        assert_eq!(parameters.ignore, vec!["Foo", "Bar"]);
        assert_eq!(parameters.genre, None);
    }

    #[test]
    fn test_request_rejects_bad_date_and_days() {
        assert!(matches!(
            request("03/01/2024", 1).to_parameters(),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            request("2024-03-01", 0).to_parameters(),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            request("2024-03-01", MAX_DAYS + 1).to_parameters(),
            Err(ApiError::BadRequest(_))
        ));
    }
}
