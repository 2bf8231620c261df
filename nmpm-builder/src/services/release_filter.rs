//! Date and ignore-list filtering of candidate releases

use chrono::{Duration, NaiveDate};

use crate::models::Release;

/// Keep releases dated exactly on one of `requested_dates`, minus ignored artists
///
/// Dates are compared as strings; multi-day ranges must be enumerated (see
/// [`expand_dates`]). Artist matching is exact and case-sensitive. Input
/// order is preserved.
pub fn filter_releases(
    releases: Vec<Release>,
    requested_dates: &[String],
    ignore_artists: &[String],
) -> Vec<Release> {
    releases
        .into_iter()
        .filter(|release| requested_dates.iter().any(|d| *d == release.date))
        .filter(|release| !ignore_artists.iter().any(|a| *a == release.artist))
        .collect()
}

/// `days` consecutive `YYYY-MM-DD` dates starting at `start`
pub fn expand_dates(start: NaiveDate, days: u32) -> Vec<String> {
    (0..days)
        .map(|offset| (start + Duration::days(offset as i64)).format("%Y-%m-%d").to_string())
        .collect()
}
