//! Monthly catalog snapshot refresh
//!
//! Fetches every release of a month (all genres), looks each one up in the
//! streaming catalog and replaces the month's cached rows with the result.

use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::SqlitePool;

use crate::clients::StreamingCatalog;
use crate::db::catalog::{self, CatalogSnapshotEntry};
use crate::models::{Release, ReleasePeriod, ANY_GENRE};
use crate::services::catalog_fetcher::CatalogFetcher;
use crate::services::catalog_matcher::streaming_query;
use crate::services::reconciliation_pipeline::BuildError;

static NON_SLUG_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9\s]").expect("static regex"));

/// Lower-case ASCII slug: punctuation dropped, each whitespace becomes `-`
pub fn slugify(input: &str) -> String {
    let lowered = input.trim().to_lowercase();
    NON_SLUG_CHARS
        .replace_all(&lowered, "")
        .chars()
        .map(|c| if c.is_whitespace() { '-' } else { c })
        .collect()
}

/// Unique `artist:album` keys in release order; repeats get `:2`, `:3`, ...
pub fn assign_release_keys(releases: &[Release]) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::new();

    releases
        .iter()
        .map(|release| {
            let base = format!("{}:{}", slugify(&release.artist), slugify(&release.album));
            let mut key = base.clone();
            let mut n = 1;
            while taken.contains(&key) {
                n += 1;
                key = format!("{}:{}", base, n);
            }
            taken.insert(key.clone());
            key
        })
        .collect()
}

/// Result of one month refresh
#[derive(Debug, Clone, Default)]
pub struct SnapshotSummary {
    pub releases: usize,
    /// Releases with at least one streaming album
    pub matched: usize,
    /// Releases whose streaming lookup failed
    pub failed_lookups: usize,
}

/// Rebuilds the cached catalog of one month
pub struct CatalogSnapshotBuilder {
    fetcher: CatalogFetcher,
    streaming: Arc<dyn StreamingCatalog>,
    pool: SqlitePool,
}

impl CatalogSnapshotBuilder {
    pub fn new(fetcher: CatalogFetcher, streaming: Arc<dyn StreamingCatalog>, pool: SqlitePool) -> Self {
        Self {
            fetcher,
            streaming,
            pool,
        }
    }

    /// Replace the snapshot of `period`
    ///
    /// A catalog failure or rejected credential aborts before anything is
    /// written; other lookup failures leave that release without album ids.
    pub async fn refresh_month(&self, period: ReleasePeriod) -> Result<SnapshotSummary, BuildError> {
        let releases = self.fetcher.fetch_all_releases(period, ANY_GENRE).await?;
        let keys = assign_release_keys(&releases);

        let mut summary = SnapshotSummary {
            releases: releases.len(),
            ..Default::default()
        };
        let mut entries = Vec::with_capacity(releases.len());

        for (index, (release, key)) in releases.into_iter().zip(keys).enumerate() {
            let album_ids = match self.streaming.search_albums(&streaming_query(&release)).await {
                Ok(albums) => albums.into_iter().map(|a| a.id).collect::<Vec<_>>(),
                Err(e) if e.is_systemic() => return Err(BuildError::Streaming(e)),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Streaming lookup failed");
                    summary.failed_lookups += 1;
                    Vec::new()
                }
            };

            if !album_ids.is_empty() {
                summary.matched += 1;
            }

            tracing::debug!(index = index + 1, key = %key, albums = album_ids.len(), "Snapshot entry");

            entries.push(CatalogSnapshotEntry {
                release_key: key,
                release,
                streaming_album_ids: album_ids,
            });
        }

        catalog::replace_month(&self.pool, period, &entries).await?;

        tracing::info!(
            month = %period,
            releases = summary.releases,
            matched = summary.matched,
            failed_lookups = summary.failed_lookups,
            "Catalog snapshot refreshed"
        );

        Ok(summary)
    }
}
