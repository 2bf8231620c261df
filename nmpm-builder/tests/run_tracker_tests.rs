//! Run bookkeeping against an in-memory database

mod helpers;

use helpers::{memory_pool, release};
use nmpm_builder::models::{BuildParameters, MatchEntry, Playlist, RunState, RunTotals};
use nmpm_builder::services::RunTracker;
use nmpm_common::Error;

fn parameters() -> BuildParameters {
    BuildParameters {
        dates: vec!["2024-03-01".to_string(), "2024-03-02".to_string()],
        genre: Some("Doom".to_string()),
        ignore: vec!["Foo".to_string()],
        playlist: None,
    }
}

fn entry(artist: &str) -> MatchEntry {
    MatchEntry::new(
        release(artist, &format!("{} album", artist), "2024-03-01"),
        Vec::new(),
        Vec::new(),
        Vec::new(),
    )
}

#[tokio::test]
async fn test_run_lifecycle() {
    let tracker = RunTracker::new(memory_pool().await);

    tracker.start_run("owner-1", "run-1", &parameters()).await.unwrap();

    let active = tracker.active_run("owner-1").await.unwrap().unwrap();
    assert_eq!(active.run_key, "run-1");

    tracker
        .attach_playlist(
            "owner-1",
            "run-1",
            &Playlist {
                id: "pl-1".to_string(),
                name: "Metal - Doom - 2024-03-01".to_string(),
                url: "https://open.spotify.com/playlist/pl-1".to_string(),
            },
        )
        .await
        .unwrap();

    let mut totals = RunTotals::default();
    for artist in ["B", "A", "C"] {
        let e = entry(artist);
        totals.add_entry(&e, 1);
        tracker.record_entry("owner-1", "run-1", &e, &totals).await.unwrap();
    }

    let running = tracker.load_run("owner-1", "run-1").await.unwrap().unwrap();
    assert_eq!(running.state, RunState::Running);
    assert_eq!(running.date, "2024-03-01");
    assert_eq!(running.days, 2);
    assert_eq!(running.genre.as_deref(), Some("Doom"));
    assert_eq!(running.ignore, vec!["Foo"]);
    assert_eq!(running.playlist_name.as_deref(), Some("Metal - Doom - 2024-03-01"));
    assert_eq!(running.tracks_added, 3);
    assert!(running.ended_at.is_none());

    tracker
        .finish_run("owner-1", "run-1", RunState::Completed)
        .await
        .unwrap();

    let finished = tracker.load_run("owner-1", "run-1").await.unwrap().unwrap();
    assert_eq!(finished.state, RunState::Completed);
    assert!(finished.ended_at.is_some());
    let artists: Vec<&str> = finished
        .entries
        .iter()
        .map(|e| e.release.artist.as_str())
        .collect();
    assert_eq!(artists, vec!["B", "A", "C"]);
    assert!(tracker.active_run("owner-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_failure_keeps_recorded_entries() {
    let tracker = RunTracker::new(memory_pool().await);
    tracker.start_run("owner-1", "run-1", &parameters()).await.unwrap();

    let e = entry("A");
    let mut totals = RunTotals::default();
    totals.add_entry(&e, 0);
    tracker.record_entry("owner-1", "run-1", &e, &totals).await.unwrap();

    tracker
        .finish_run_on_error("owner-1", "run-1", "Release catalog error: timeout")
        .await
        .unwrap();

    let record = tracker.load_run("owner-1", "run-1").await.unwrap().unwrap();
    assert_eq!(record.state, RunState::Failed);
    assert_eq!(record.error.as_deref(), Some("Release catalog error: timeout"));
    assert_eq!(record.entries.len(), 1);
    assert!(tracker.active_run("owner-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_one_active_run_per_owner() {
    let tracker = RunTracker::new(memory_pool().await);
    tracker.start_run("owner-1", "run-1", &parameters()).await.unwrap();

    let second = tracker.start_run("owner-1", "run-2", &parameters()).await;
    assert!(matches!(second, Err(Error::Conflict(_))));
    // The rejected start left no record behind
    assert!(tracker.load_run("owner-1", "run-2").await.unwrap().is_none());

    // Other owners are independent
    tracker.start_run("owner-2", "run-1", &parameters()).await.unwrap();

    tracker
        .finish_run("owner-1", "run-1", RunState::Cancelled)
        .await
        .unwrap();
    tracker.start_run("owner-1", "run-2", &parameters()).await.unwrap();
}

#[tokio::test]
async fn test_duplicate_run_key_conflicts() {
    let tracker = RunTracker::new(memory_pool().await);
    tracker.start_run("owner-1", "run-1", &parameters()).await.unwrap();
    tracker
        .finish_run("owner-1", "run-1", RunState::Completed)
        .await
        .unwrap();

    let again = tracker.start_run("owner-1", "run-1", &parameters()).await;
    assert!(matches!(again, Err(Error::Conflict(_))));
    assert!(tracker.active_run("owner-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_record_entry_for_unknown_run_is_not_found() {
    let tracker = RunTracker::new(memory_pool().await);
    let result = tracker
        .record_entry("owner-1", "missing", &entry("A"), &RunTotals::default())
        .await;
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_list_runs_newest_first() {
    let tracker = RunTracker::new(memory_pool().await);

    for key in ["run-1", "run-2"] {
        tracker.start_run("owner-1", key, &parameters()).await.unwrap();
        tracker
            .finish_run("owner-1", key, RunState::Completed)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let runs = tracker.list_runs("owner-1").await.unwrap();
    let keys: Vec<&str> = runs.iter().map(|r| r.run_key.as_str()).collect();
    assert_eq!(keys, vec!["run-2", "run-1"]);
    assert!(tracker.list_runs("owner-2").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_recover_interrupted_runs() {
    let tracker = RunTracker::new(memory_pool().await);
    tracker.start_run("owner-1", "run-1", &parameters()).await.unwrap();
    tracker.start_run("owner-2", "run-1", &parameters()).await.unwrap();
    tracker
        .finish_run("owner-2", "run-1", RunState::Completed)
        .await
        .unwrap();
    tracker.start_run("owner-2", "run-2", &parameters()).await.unwrap();

    assert_eq!(tracker.recover_interrupted_runs().await.unwrap(), 2);

    let record = tracker.load_run("owner-1", "run-1").await.unwrap().unwrap();
    assert_eq!(record.state, RunState::Failed);
    assert!(record.error.is_some());
    let completed = tracker.load_run("owner-2", "run-1").await.unwrap().unwrap();
    assert_eq!(completed.state, RunState::Completed);

    assert!(tracker.active_run("owner-1").await.unwrap().is_none());
    assert!(tracker.active_run("owner-2").await.unwrap().is_none());
    assert_eq!(tracker.recover_interrupted_runs().await.unwrap(), 0);
}
