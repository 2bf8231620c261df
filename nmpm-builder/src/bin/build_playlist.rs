//! build-playlist - run one playlist build in the foreground
//!
//! Prints one line per processed release and the run totals. Ctrl+C cancels
//! the run cleanly.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Parser;
use nmpm_common::config::{self, TomlConfig};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use nmpm_builder::clients::{BandcampClient, MetalArchivesClient, SpotifyClient};
use nmpm_builder::db;
use nmpm_builder::models::{BuildParameters, RunState};
use nmpm_builder::services::{
    CatalogFetcher, CatalogMatcher, PlaylistMutator, ReconciliationPipeline, RunTracker,
};

/// Command-line arguments for build-playlist
#[derive(Parser, Debug)]
#[command(name = "build-playlist")]
#[command(about = "Add newly released metal albums to a streaming playlist")]
#[command(version)]
struct Args {
    /// Streaming access token (defaults to the owner's stored credential)
    #[arg(short, long)]
    auth: Option<String>,

    /// Release dates, YYYY-MM-DD (defaults to today)
    #[arg(short, long, num_args = 1..)]
    dates: Vec<String>,

    /// Artists to skip
    #[arg(short, long, num_args = 1..)]
    ignore: Vec<String>,

    /// Genre filter
    #[arg(short, long)]
    genre: Option<String>,

    /// Existing playlist id to extend
    #[arg(short, long)]
    playlist: Option<String>,

    /// Owner the run is recorded under
    #[arg(short, long, default_value = "cli")]
    owner: String,

    /// Folder holding the database
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Pause after each release in milliseconds (overrides the config file)
    #[arg(long)]
    pacing_ms: Option<u64>,
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

    let root_folder = config::resolve_root_folder(args.root_folder.as_deref(), &toml_config);
    let pool = db::init_database_pool(&config::database_path(&root_folder)).await?;

    let access_token = match args.auth.clone() {
        Some(token) => token,
        None => match db::credentials::valid_access_token(&pool, &args.owner).await? {
            Some(token) => token,
            None => bail!("Missing auth token: pass --auth or store a credential for '{}'", args.owner),
        },
    };

    let dates = if args.dates.is_empty() {
        vec![Local::now().format("%Y-%m-%d").to_string()]
    } else {
        args.dates.clone()
    };

    let parameters = BuildParameters {
        dates,
        genre: args.genre.clone(),
        ignore: args.ignore.clone(),
        playlist: args.playlist.clone(),
    };

    let streaming = Arc::new(
        SpotifyClient::with_base_url(access_token, &toml_config.spotify_api_base)
            .context("Failed to create streaming client")?,
    );
    let tracker = RunTracker::new(pool);
    let pipeline = ReconciliationPipeline::new(
        CatalogFetcher::new(Arc::new(MetalArchivesClient::new()?)),
        CatalogMatcher::new(streaming.clone(), Arc::new(BandcampClient::new()?)),
        PlaylistMutator::new(streaming),
        tracker.clone(),
    )
    .with_pacing(Duration::from_millis(
        args.pacing_ms.unwrap_or(toml_config.pacing_ms),
    ));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Cancelling...");
                cancel.cancel();
            }
        });
    }

    let run_key = Uuid::new_v4().to_string();
    println!("Run {} for {}: {}", run_key, args.owner, parameters.dates.join(", "));

    let result = pipeline
        .run(&args.owner, &run_key, &parameters, cancel)
        .await;

    // Print whatever was recorded, whichever way the run ended
    if let Some(record) = tracker.load_run(&args.owner, &run_key).await? {
        if let (Some(name), Some(url)) = (&record.playlist_name, &record.playlist_url) {
            println!("Playlist: {} ({})", name, url);
        }
        for (i, entry) in record.entries.iter().enumerate() {
            println!(
                "{:>4} {} {} - {} [{}]",
                i + 1,
                match (entry.matched_streaming, entry.matched_storefront) {
                    (true, _) => "+",
                    (false, true) => "~",
                    (false, false) => "-",
                },
                entry.release.artist,
                entry.release.album,
                entry.release.genre,
            );
        }
    }

    let summary = result?;
    println!(
        "{}: {} releases, {} streaming albums, {} storefront albums, {} tracks added",
        summary.state.as_str(),
        summary.releases,
        summary.totals.streaming,
        summary.totals.storefront,
        summary.totals.tracks_added,
    );
    if summary.unrecorded_entries > 0 {
        eprintln!("Warning: {} entries could not be recorded", summary.unrecorded_entries);
    }

    if summary.state == RunState::Cancelled {
        std::process::exit(130);
    }
    Ok(())
}
