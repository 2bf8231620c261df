//! Streaming credential handoff
//!
//! PUT /credentials/:owner_id, DELETE /credentials/:owner_id

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::put,
    Json, Router,
};
use serde::Deserialize;

use crate::{db, error::ApiResult, AppState};

/// PUT /credentials/:owner_id request
#[derive(Debug, Deserialize)]
pub struct SaveCredentialRequest {
    pub access_token: String,
    /// Token lifetime in seconds, as returned by the authorization server
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// PUT /credentials/:owner_id
pub async fn save_credential(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
    Json(request): Json<SaveCredentialRequest>,
) -> ApiResult<StatusCode> {
    db::credentials::save_access_token(
        &state.db,
        &owner_id,
        &request.access_token,
        request.expires_in,
    )
    .await?;

    tracing::info!(owner_id = %owner_id, expires_in = ?request.expires_in, "Streaming credential stored");
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /credentials/:owner_id
pub async fn delete_credential(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
) -> ApiResult<StatusCode> {
    db::credentials::delete_access_token(&state.db, &owner_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Credential routes
pub fn credential_routes() -> Router<AppState> {
    Router::new().route(
        "/credentials/:owner_id",
        put(save_credential).delete(delete_credential),
    )
}
