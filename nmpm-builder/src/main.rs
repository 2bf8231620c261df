//! nmpm-builder - playlist build service
//!
//! Serves the build API: owners hand over a streaming credential, start
//! builds, poll their run records and cancel them.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use nmpm_common::config::{self, TomlConfig};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nmpm_builder::clients::HttpClientFactory;
use nmpm_builder::services::RunTracker;
use nmpm_builder::AppState;

/// Command-line arguments for nmpm-builder
#[derive(Parser, Debug)]
#[command(name = "nmpm-builder")]
#[command(about = "Builds streaming playlists from newly released metal albums")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides NMPM_PORT and the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Folder holding the database (overrides NMPM_ROOT_FOLDER and the config file)
    #[arg(short, long)]
    root_folder: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let toml_config = TomlConfig::load_or_default();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| toml_config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting nmpm-builder");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let root_folder = config::resolve_root_folder(args.root_folder.as_deref(), &toml_config);
    let db_path = config::database_path(&root_folder);
    info!("Database: {}", db_path.display());

    let db_pool = nmpm_builder::db::init_database_pool(&db_path)
        .await
        .context("Failed to open database")?;

    // No task survives a restart to finish runs left RUNNING
    RunTracker::new(db_pool.clone())
        .recover_interrupted_runs()
        .await
        .context("Failed to recover interrupted runs")?;

    let clients = HttpClientFactory::new(&toml_config.spotify_api_base)
        .context("Failed to build HTTP clients")?;

    let state = AppState::new(db_pool, Arc::new(clients))
        .with_pacing(Duration::from_millis(toml_config.pacing_ms));
    let app = nmpm_builder::build_router(state);

    let port = args.port.unwrap_or_else(|| toml_config.resolve_port());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
