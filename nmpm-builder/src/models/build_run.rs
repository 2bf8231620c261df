//! Build run state machine and persisted run record
//!
//! A run progresses through:
//! IDLE → PLAYLIST_RESOLVING → FETCHING → FILTERING → PROCESSING(i) → COMPLETED | FAILED | CANCELLED

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MatchEntry;

/// Wildcard genre passed to the source catalog when no filter is given
pub const ANY_GENRE: &str = "*";

/// In-memory pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Idle,
    PlaylistResolving,
    Fetching,
    Filtering,
    /// Processing the release at this index of the filtered list
    Processing(usize),
    Completed,
    Failed,
    Cancelled,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Completed | PipelineState::Failed | PipelineState::Cancelled
        )
    }
}

/// State transition event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub old_state: PipelineState,
    pub new_state: PipelineState,
    pub transitioned_at: DateTime<Utc>,
}

/// Persisted lifecycle state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Running => "RUNNING",
            RunState::Completed => "COMPLETED",
            RunState::Failed => "FAILED",
            RunState::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "RUNNING" => Some(RunState::Running),
            "COMPLETED" => Some(RunState::Completed),
            "FAILED" => Some(RunState::Failed),
            "CANCELLED" => Some(RunState::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunState::Running)
    }
}

/// Parameters of one build, as supplied by the boundary layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildParameters {
    /// Every requested release date, `YYYY-MM-DD`, enumerated explicitly
    pub dates: Vec<String>,
    /// Genre filter; `None` means any genre
    #[serde(default)]
    pub genre: Option<String>,
    /// Artists skipped entirely (exact, case-sensitive)
    #[serde(default)]
    pub ignore: Vec<String>,
    /// Existing playlist to extend; a new one is created when absent
    #[serde(default)]
    pub playlist: Option<String>,
}

impl BuildParameters {
    /// First requested date (names the playlist)
    pub fn first_date(&self) -> Option<&str> {
        self.dates.first().map(String::as_str)
    }

    pub fn days(&self) -> usize {
        self.dates.len()
    }

    /// Genre as sent to the source catalog: the filter, or the wildcard
    pub fn genre_filter(&self) -> &str {
        self.genre
            .as_deref()
            .filter(|g| !g.trim().is_empty())
            .unwrap_or(ANY_GENRE)
    }
}

/// Running totals rewritten after every processed release
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTotals {
    /// Streaming albums found
    pub streaming: usize,
    /// Storefront albums found
    pub storefront: usize,
    /// Tracks appended to the playlist
    pub tracks_added: usize,
}

impl RunTotals {
    /// Fold one recorded entry into the totals
    pub fn add_entry(&mut self, entry: &MatchEntry, tracks_added: usize) {
        self.streaming += entry.streaming_hits.len();
        self.storefront += entry.storefront_hits.len();
        self.tracks_added += tracks_added;
    }
}

/// Durable record of one build run, keyed by `(owner_id, run_key)`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub owner_id: String,
    pub run_key: String,
    pub state: RunState,
    /// First requested date
    pub date: String,
    pub days: usize,
    pub genre: Option<String>,
    pub ignore: Vec<String>,
    pub parameters: BuildParameters,
    pub playlist: Option<String>,
    pub playlist_name: Option<String>,
    pub playlist_url: Option<String>,
    /// Entries in processing order
    pub entries: Vec<MatchEntry>,
    pub streaming_total: usize,
    pub storefront_total: usize,
    pub tracks_added: usize,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Short listing row for an owner's runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunListing {
    pub run_key: String,
    pub state: RunState,
    pub date: String,
    pub playlist_name: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Marker that a run is currently in flight for an owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRun {
    pub owner_id: String,
    pub run_key: String,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(genre: Option<&str>) -> BuildParameters {
        BuildParameters {
            dates: vec!["2024-03-01".to_string(), "2024-03-02".to_string()],
            genre: genre.map(str::to_string),
            ignore: Vec::new(),
            playlist: None,
        }
    }

    #[test]
    fn test_genre_filter_defaults_to_wildcard() {
        assert_eq!(params(None).genre_filter(), "*");
        assert_eq!(params(Some("  ")).genre_filter(), "*");
        assert_eq!(params(Some("Black")).genre_filter(), "Black");
    }

    #[test]
    fn test_run_state_round_trips_through_column_text() {
        for state in [
            RunState::Running,
            RunState::Completed,
            RunState::Failed,
            RunState::Cancelled,
        ] {
            assert_eq!(RunState::parse(state.as_str()), Some(state));
        }
        assert_eq!(RunState::parse("PAUSED"), None);
    }

    #[test]
    fn test_pipeline_terminal_states() {
        assert!(PipelineState::Completed.is_terminal());
        assert!(PipelineState::Cancelled.is_terminal());
        assert!(!PipelineState::Processing(3).is_terminal());
    }
}
