//! Paginated release ingestion
//!
//! Pages through the source catalog until the accumulated count reaches the
//! total reported by the source. Any page failure aborts the whole fetch,
//! since a partial listing would corrupt the offset/total accounting.

use std::sync::Arc;

use crate::clients::{CatalogError, ReleaseSource};
use crate::models::{Release, ReleasePeriod};

/// Aggregates every page of a release query into one ordered list
pub struct CatalogFetcher {
    source: Arc<dyn ReleaseSource>,
}

impl CatalogFetcher {
    pub fn new(source: Arc<dyn ReleaseSource>) -> Self {
        Self { source }
    }

    /// All releases of a month for a genre filter, in source order
    ///
    /// `genre` is passed through unchanged (`*` is the wildcard). No sorting
    /// or deduplication is done.
    pub async fn fetch_all_releases(
        &self,
        period: ReleasePeriod,
        genre: &str,
    ) -> Result<Vec<Release>, CatalogError> {
        let mut page = 0;
        let first = self.source.fetch_page(period, genre, page).await?;
        let total = first.total;
        let mut releases = first.releases;

        while releases.len() < total {
            page += 1;
            let next = self.source.fetch_page(period, genre, page).await?;

            if next.releases.is_empty() {
                tracing::warn!(
                    period = %period,
                    page,
                    fetched = releases.len(),
                    total,
                    "Release source returned an empty page before reaching its total"
                );
                break;
            }

            releases.extend(next.releases);
        }

        tracing::info!(
            period = %period,
            genre = %genre,
            pages = page + 1,
            releases = releases.len(),
            "Fetched release catalog"
        );

        Ok(releases)
    }

    /// Releases of several months concatenated in the given order
    pub async fn fetch_periods(
        &self,
        periods: &[ReleasePeriod],
        genre: &str,
    ) -> Result<Vec<Release>, CatalogError> {
        let mut releases = Vec::new();
        for period in periods {
            releases.extend(self.fetch_all_releases(*period, genre).await?);
        }
        Ok(releases)
    }
}
