//! Candidate releases discovered in the source catalog

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One album/artist entry discovered in the source catalog for a given date
///
/// Immutable once fetched. The source does not guarantee uniqueness, and no
/// identity-based deduplication is done anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub artist: String,
    pub artist_url: String,
    pub album: String,
    pub album_url: String,
    pub genre: String,
    /// Release date, `YYYY-MM-DD`
    pub date: String,
}

/// Calendar month the source catalog is queried for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReleasePeriod {
    pub year: i32,
    pub month: u32,
}

impl ReleasePeriod {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    /// Period containing a `YYYY-MM-DD` date
    pub fn from_date(date: &str) -> Result<Self, nmpm_common::Error> {
        let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|e| {
            nmpm_common::Error::InvalidInput(format!("Invalid date '{}': {}", date, e))
        })?;
        Ok(Self::new(parsed.year(), parsed.month()))
    }

    /// Parse a `YYYY-MM` month string
    pub fn from_month(month: &str) -> Result<Self, nmpm_common::Error> {
        Self::from_date(&format!("{}-01", month))
    }

    /// Distinct periods covering the requested dates, in first-appearance order
    pub fn covering(dates: &[String]) -> Result<Vec<Self>, nmpm_common::Error> {
        let mut periods: Vec<Self> = Vec::new();
        for date in dates {
            let period = Self::from_date(date)?;
            if !periods.contains(&period) {
                periods.push(period);
            }
        }
        Ok(periods)
    }
}

impl fmt::Display for ReleasePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// One page of results from the source catalog
#[derive(Debug, Clone, Default)]
pub struct ReleasePage {
    pub releases: Vec<Release>,
    /// Total number of records the source reports for the whole query
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_from_date() {
        let period = ReleasePeriod::from_date("2024-03-02").unwrap();
        assert_eq!(period, ReleasePeriod::new(2024, 3));
        assert_eq!(period.to_string(), "2024-03");
    }

    #[test]
    fn test_period_rejects_garbage() {
        assert!(ReleasePeriod::from_date("March 2nd").is_err());
        assert!(ReleasePeriod::from_month("2024-13").is_err());
    }

    #[test]
    fn test_covering_spans_month_boundary() {
        let dates = vec![
            "2024-03-30".to_string(),
            "2024-03-31".to_string(),
            "2024-04-01".to_string(),
        ];
        let periods = ReleasePeriod::covering(&dates).unwrap();
        assert_eq!(
            periods,
            vec![ReleasePeriod::new(2024, 3), ReleasePeriod::new(2024, 4)]
        );
    }
}
