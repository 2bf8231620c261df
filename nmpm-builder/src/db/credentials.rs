//! Cached streaming service credentials
//!
//! The authorization flow lives outside the builder; it hands over an access
//! token per owner, which is cached here until it expires.

use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};
use nmpm_common::{Error, Result};

/// Tokens are treated as expired this long before their real expiry
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Store (or replace) an owner's access token
pub async fn save_access_token(
    pool: &SqlitePool,
    owner_id: &str,
    access_token: &str,
    expires_in_secs: Option<i64>,
) -> Result<()> {
    if access_token.trim().is_empty() {
        return Err(Error::InvalidInput("Access token is empty".to_string()));
    }

    let expires_at = expires_in_secs
        .map(|secs| Utc::now() + Duration::seconds((secs - EXPIRY_MARGIN_SECS).max(0)))
        .map(|dt| dt.to_rfc3339());

    sqlx::query(
        r#"
        INSERT INTO credentials (owner_id, access_token, expires_at)
        VALUES (?, ?, ?)
        ON CONFLICT(owner_id) DO UPDATE SET
            access_token = excluded.access_token,
            expires_at = excluded.expires_at
        "#,
    )
    .bind(owner_id)
    .bind(access_token)
    .bind(expires_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// An owner's access token, unless missing or expired
pub async fn valid_access_token(pool: &SqlitePool, owner_id: &str) -> Result<Option<String>> {
    let row = sqlx::query("SELECT access_token, expires_at FROM credentials WHERE owner_id = ?")
        .bind(owner_id)
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let expires_at: Option<String> = row.get("expires_at");
    if let Some(expires_at) = expires_at {
        let expires_at = DateTime::parse_from_rfc3339(&expires_at)
            .map_err(|e| Error::Internal(format!("Failed to parse expires_at: {}", e)))?
            .with_timezone(&Utc);
        if expires_at <= Utc::now() {
            tracing::debug!(owner_id = %owner_id, "Cached access token expired");
            return Ok(None);
        }
    }

    Ok(Some(row.get("access_token")))
}

/// Forget an owner's token
pub async fn delete_access_token(pool: &SqlitePool, owner_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM credentials WHERE owner_id = ?")
        .bind(owner_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_round_trip() {
        let pool = crate::db::init_memory_pool().await.unwrap();

        save_access_token(&pool, "owner-1", "token-a", Some(3600)).await.unwrap();
        assert_eq!(
            valid_access_token(&pool, "owner-1").await.unwrap().as_deref(),
            Some("token-a")
        );

        save_access_token(&pool, "owner-1", "token-b", None).await.unwrap();
        assert_eq!(
            valid_access_token(&pool, "owner-1").await.unwrap().as_deref(),
            Some("token-b")
        );

        delete_access_token(&pool, "owner-1").await.unwrap();
        assert!(valid_access_token(&pool, "owner-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_token_is_missing() {
        let pool = crate::db::init_memory_pool().await.unwrap();

        // Shorter than the margin, so it is already expired
        save_access_token(&pool, "owner-1", "token-a", Some(30)).await.unwrap();
        assert!(valid_access_token(&pool, "owner-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_token_rejected() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        assert!(matches!(
            save_access_token(&pool, "owner-1", " ", None).await,
            Err(Error::InvalidInput(_))
        ));
    }
}
