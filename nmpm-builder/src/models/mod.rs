//! Data models for the playlist builder

pub mod build_run;
pub mod match_entry;
pub mod release;
pub mod streaming;

pub use build_run::{
    ActiveRun, BuildParameters, PipelineState, RunListing, RunRecord, RunState, RunTotals,
    StateTransition, ANY_GENRE,
};
pub use match_entry::{LookupFailure, LookupSource, MatchEntry, StorefrontHit, StreamingAlbum};
pub use release::{Release, ReleasePage, ReleasePeriod};
pub use streaming::{Playlist, StreamingUser, Track};
