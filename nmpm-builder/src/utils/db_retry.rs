//! Lock-contention retry for run bookkeeping writes
//!
//! Entry writes happen once per processed release while API pollers read the
//! same tables, so a short `database is locked` is expected now and then.

use std::future::Future;
use std::time::{Duration, Instant};

use nmpm_common::{Error, Result};

const FIRST_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_millis(1000);

/// Run `write` until it succeeds, fails for another reason, or `max_wait_ms` passes
///
/// Backoff doubles from 10 ms up to 1 s between attempts.
pub async fn retry_on_lock<F, Fut, T>(write_name: &str, max_wait_ms: u64, mut write: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let deadline = Duration::from_millis(max_wait_ms);
    let mut backoff = FIRST_BACKOFF;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let err = match write().await {
            Ok(value) => {
                if attempts > 1 {
                    tracing::debug!(write = write_name, attempts, "Bookkeeping write went through after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_lock_contention() => err,
            Err(err) => return Err(err),
        };

        let waited = started.elapsed();
        if waited >= deadline {
            tracing::error!(
                write = write_name,
                attempts,
                waited_ms = waited.as_millis(),
                error = %err,
                "Database still locked, giving up"
            );
            return Err(Error::Internal(format!(
                "{}: database locked after {} attempts in {} ms",
                write_name,
                attempts,
                waited.as_millis()
            )));
        }

        tracing::warn!(
            write = write_name,
            attempts,
            backoff_ms = backoff.as_millis(),
            "Database locked, retrying"
        );
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn locked() -> Error {
        Error::Database(sqlx::Error::Protocol("database is locked".to_string()))
    }

    #[tokio::test]
    async fn test_lock_contention_is_retried_until_success() {
        let attempts = AtomicU32::new(0);

        let result = retry_on_lock("record_entry", 5000, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(locked())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_wait() {
        let result = retry_on_lock("record_entry", 0, || async { Err::<(), Error>(locked()) }).await;
        assert!(matches!(result, Err(Error::Internal(msg)) if msg.starts_with("record_entry")));
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let attempts = AtomicU32::new(0);

        let result = retry_on_lock("record_entry", 5000, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), Error>(Error::NotFound("Run owner-1/run-1".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
