//! Busy-retry for store writes
//!
//! SQLITE_BUSY under WAL is transient; retry with exponential backoff
//! until a bounded total wait elapses. Any other error fails immediately.

use crate::error::StoreError;
use std::time::{Duration, Instant};

/// Retry `operation` while it returns `StoreError::Busy`, up to
/// `max_wait_ms` total elapsed time.
///
/// Backoff starts at 10ms and doubles to a 1s cap.
pub async fn retry_on_busy<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, StoreError>>,
{
    let start = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0u32;
    let mut backoff_ms = 10u64;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "store operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(StoreError::Busy) => {
                let elapsed = start.elapsed();
                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        max_wait_ms,
                        "store busy, retry budget exhausted"
                    );
                    return Err(StoreError::Busy);
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    "store busy, backing off"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(1000);
            }
            Err(other) => return Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_succeeds_first_attempt() {
        let result = retry_on_busy("test", 1000, || async { Ok::<_, StoreError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_retries_busy_then_succeeds() {
        let attempts = AtomicU32::new(0);
        let result = retry_on_busy("test", 5000, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::Busy)
                } else {
                    Ok(99)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 99);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_busy_fails_immediately() {
        let attempts = AtomicU32::new(0);
        let result: Result<i32, _> = retry_on_busy("test", 5000, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Integrity("broken".into())) }
        })
        .await;
        assert!(matches!(result, Err(StoreError::Integrity(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_exhaustion() {
        let result: Result<i32, _> =
            retry_on_busy("test", 30, || async { Err(StoreError::Busy) }).await;
        assert!(matches!(result, Err(StoreError::Busy)));
    }
}
