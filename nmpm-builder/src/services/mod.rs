//! Playlist build services
//!
//! The reconciliation pipeline composes the fetcher, filter, matcher,
//! playlist mutator and run tracker; the snapshot builder reuses the fetcher
//! for the monthly catalog cache.

pub mod catalog_fetcher;
pub mod catalog_matcher;
pub mod catalog_snapshot;
pub mod playlist_mutator;
pub mod reconciliation_pipeline;
pub mod release_filter;
pub mod run_tracker;

pub use catalog_fetcher::CatalogFetcher;
pub use catalog_matcher::{CatalogMatcher, MatchOutcome};
pub use catalog_snapshot::{CatalogSnapshotBuilder, SnapshotSummary};
pub use playlist_mutator::{AppendOutcome, PlaylistMutator};
pub use reconciliation_pipeline::{BuildError, ReconciliationPipeline, RunSummary, DEFAULT_PACING};
pub use release_filter::{expand_dates, filter_releases};
pub use run_tracker::RunTracker;
