//! nmpm-builder library interface
//!
//! Exposes the build pipeline, clients and HTTP API for the binaries and
//! integration tests.

pub mod api;
pub mod clients;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::clients::ClientFactory;
use crate::services::DEFAULT_PACING;

/// Cancellation handle key: `(owner_id, run_key)`
pub type RunId = (String, String);

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Builds the external clients of each run
    pub clients: Arc<dyn ClientFactory>,
    /// Cancellation tokens of runs in flight in this process
    pub cancellation_tokens: Arc<RwLock<HashMap<RunId, CancellationToken>>>,
    /// Pause after each processed release
    pub pacing: Duration,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(db: SqlitePool, clients: Arc<dyn ClientFactory>) -> Self {
        Self {
            db,
            clients,
            cancellation_tokens: Arc::new(RwLock::new(HashMap::new())),
            pacing: DEFAULT_PACING,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::build_routes())
        .merge(api::credential_routes())
        .merge(api::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        // Browser front-ends poll run status from another origin
        .layer(CorsLayer::permissive())
}
