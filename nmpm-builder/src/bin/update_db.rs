//! update-db - refresh the cached release catalog of one month

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Parser;
use nmpm_common::config::{self, TomlConfig};

use nmpm_builder::clients::{MetalArchivesClient, SpotifyClient};
use nmpm_builder::db;
use nmpm_builder::models::ReleasePeriod;
use nmpm_builder::services::{CatalogFetcher, CatalogSnapshotBuilder};

/// Command-line arguments for update-db
#[derive(Parser, Debug)]
#[command(name = "update-db")]
#[command(about = "Refresh the monthly release snapshot with streaming album ids")]
#[command(version)]
struct Args {
    /// Streaming access token (defaults to the owner's stored credential)
    #[arg(short, long)]
    auth: Option<String>,

    /// Month to refresh, YYYY-MM (defaults to the current month)
    #[arg(short, long)]
    month: Option<String>,

    /// Owner whose stored credential is used when --auth is absent
    #[arg(short, long, default_value = "cli")]
    owner: String,

    /// Folder holding the database
    #[arg(short, long)]
    root_folder: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let toml_config = TomlConfig::load_or_default();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&toml_config.logging.level)),
        )
        .init();

    let month = args
        .month
        .clone()
        .unwrap_or_else(|| Local::now().format("%Y-%m").to_string());
    let period = ReleasePeriod::from_month(&month)?;

    let root_folder = config::resolve_root_folder(args.root_folder.as_deref(), &toml_config);
    let pool = db::init_database_pool(&config::database_path(&root_folder)).await?;

    let access_token = match args.auth.clone() {
        Some(token) => token,
        None => match db::credentials::valid_access_token(&pool, &args.owner).await? {
            Some(token) => token,
            None => bail!("Missing auth token: pass --auth or store a credential for '{}'", args.owner),
        },
    };

    let streaming = SpotifyClient::with_base_url(access_token, &toml_config.spotify_api_base)
        .context("Failed to create streaming client")?;

    let builder = CatalogSnapshotBuilder::new(
        CatalogFetcher::new(Arc::new(MetalArchivesClient::new()?)),
        Arc::new(streaming),
        pool,
    );

    let summary = builder.refresh_month(period).await?;
    println!(
        "{}: {} releases, {} with streaming albums, {} failed lookups",
        period, summary.releases, summary.matched, summary.failed_lookups
    );

    Ok(())
}
