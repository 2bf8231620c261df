//! Database access for the playlist builder
//!
//! SQLite is the durable store for run records, active-run markers, cached
//! credentials and the monthly catalog snapshot.

pub mod catalog;
pub mod credentials;
pub mod runs;

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
///
/// Creates the database file and tables if they do not exist yet.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Use proper SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// In-memory database with all tables, for tests and dry runs
///
/// Pinned to a single connection that never expires, since every SQLite
/// in-memory connection is a separate database.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create builder tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS build_runs (
            owner_id TEXT NOT NULL,
            run_key TEXT NOT NULL,
            state TEXT NOT NULL,
            parameters TEXT NOT NULL,
            playlist_id TEXT,
            playlist_name TEXT,
            playlist_url TEXT,
            streaming_total INTEGER NOT NULL DEFAULT 0,
            storefront_total INTEGER NOT NULL DEFAULT 0,
            tracks_added INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            PRIMARY KEY (owner_id, run_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS run_entries (
            owner_id TEXT NOT NULL,
            run_key TEXT NOT NULL,
            seq INTEGER NOT NULL,
            entry TEXT NOT NULL,
            PRIMARY KEY (owner_id, run_key, seq)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per owner: the primary key is the at-most-one-active-run invariant
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS active_runs (
            owner_id TEXT PRIMARY KEY,
            run_key TEXT NOT NULL,
            started_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS credentials (
            owner_id TEXT PRIMARY KEY,
            access_token TEXT NOT NULL,
            expires_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS catalog_releases (
            month TEXT NOT NULL,
            release_key TEXT NOT NULL,
            release TEXT NOT NULL,
            streaming_album_ids TEXT NOT NULL DEFAULT '[]',
            refreshed_at TEXT NOT NULL,
            PRIMARY KEY (month, release_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!(
        "Database tables initialized (build_runs, run_entries, active_runs, credentials, catalog_releases)"
    );

    Ok(())
}
