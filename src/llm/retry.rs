//! Bounded retry with exponential backoff for capability calls.
//!
//! A capability call is request + parse; both are retried together, so a
//! malformed answer gets a fresh completion. Non-retryable errors (bad
//! credentials, invalid configuration) fail immediately.

use crate::config::RetryConfig;
use crate::error::{PageIndexError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Delay before attempt number `attempt` (1-based; the first attempt has none).
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    if attempt <= 1 {
        return Duration::ZERO;
    }
    let factor = 1u64 << (attempt - 2).min(16);
    let millis = config
        .initial_backoff_ms
        .saturating_mul(factor)
        .min(config.max_backoff_ms);
    Duration::from_millis(millis)
}

/// Run `call` until it succeeds, fails permanently, or attempts run out.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, step: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let delay = backoff_delay(config, attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) if attempt >= attempts => {
                return Err(PageIndexError::RetriesExhausted {
                    step: step.to_string(),
                    attempts,
                    source: Box::new(err),
                });
            }
            Err(err) => {
                warn!(step, attempt, error = %err, "capability call failed, retrying");
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = RetryConfig {
            max_attempts: 6,
            initial_backoff_ms: 1000,
            max_backoff_ms: 5000,
        };
        assert_eq!(backoff_delay(&config, 1), Duration::ZERO);
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&config, 3), Duration::from_millis(2000));
        assert_eq!(backoff_delay(&config, 4), Duration::from_millis(4000));
        assert_eq!(backoff_delay(&config, 5), Duration::from_millis(5000));
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry(&fast(), "classify", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(PageIndexError::Http("connection reset".into()))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_step() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = with_retry(&fast(), "summarize", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PageIndexError::LlmParse("garbage".into()))
        })
        .await;
        match result {
            Err(PageIndexError::RetriesExhausted { step, attempts, .. }) => {
                assert_eq!(step, "summarize");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = with_retry(&fast(), "verify", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PageIndexError::ApiStatus {
                status: 401,
                message: "invalid key".into(),
            })
        })
        .await;
        assert!(matches!(result, Err(PageIndexError::ApiStatus { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
