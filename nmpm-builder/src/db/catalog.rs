//! Monthly catalog snapshot persistence
//!
//! Each month's releases are stored with the streaming album ids found for
//! them, keyed by an artist/album slug.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use nmpm_common::{Error, Result};

use crate::models::{Release, ReleasePeriod};

/// One cached release of a month
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSnapshotEntry {
    pub release_key: String,
    pub release: Release,
    pub streaming_album_ids: Vec<String>,
}

/// Replace every cached row of a month with `entries`
pub async fn replace_month(
    pool: &SqlitePool,
    period: ReleasePeriod,
    entries: &[CatalogSnapshotEntry],
) -> Result<()> {
    let month = period.to_string();
    let refreshed_at = Utc::now().to_rfc3339();

    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM catalog_releases WHERE month = ?")
        .bind(&month)
        .execute(&mut *tx)
        .await?;

    for entry in entries {
        let release = serde_json::to_string(&entry.release)
            .map_err(|e| Error::Internal(format!("Failed to serialize release: {}", e)))?;
        let album_ids = serde_json::to_string(&entry.streaming_album_ids)
            .map_err(|e| Error::Internal(format!("Failed to serialize album ids: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO catalog_releases (month, release_key, release, streaming_album_ids, refreshed_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&month)
        .bind(&entry.release_key)
        .bind(&release)
        .bind(&album_ids)
        .bind(&refreshed_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Cached releases of a month, ordered by key
pub async fn load_month(pool: &SqlitePool, period: ReleasePeriod) -> Result<Vec<CatalogSnapshotEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT release_key, release, streaming_album_ids
        FROM catalog_releases
        WHERE month = ?
        ORDER BY release_key
        "#,
    )
    .bind(period.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let release: String = row.get("release");
            let album_ids: String = row.get("streaming_album_ids");
            Ok(CatalogSnapshotEntry {
                release_key: row.get("release_key"),
                release: serde_json::from_str(&release)
                    .map_err(|e| Error::Internal(format!("Failed to deserialize release: {}", e)))?,
                streaming_album_ids: serde_json::from_str(&album_ids).map_err(|e| {
                    Error::Internal(format!("Failed to deserialize album ids: {}", e))
                })?,
            })
        })
        .collect()
}
