//! Retry settings and the backoff helper used by the AIStore driver.
//!
//! The S3 driver delegates retries to the AWS SDK's standard retry mode; the
//! AIStore driver wraps its HTTP calls in [`with_retry`] instead, since the
//! reqwest client has no built-in policy.

use std::future::Future;
use std::time::Duration;

use crate::error::DriverError;

/// Retry settings for driver I/O.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Maximum number of attempts, including the initial one.
    pub max_attempts: u32,
    /// Initial backoff delay in milliseconds.
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 100,
            max_backoff_ms: 4_000,
        }
    }
}

impl RetrySettings {
    /// Backoff delay before the given retry (1-based), doubling per attempt
    /// and capped at `max_backoff_ms`.
    fn backoff(&self, retry: u32) -> Duration {
        let exp = self
            .initial_backoff_ms
            .saturating_mul(1u64 << retry.saturating_sub(1).min(20));
        Duration::from_millis(exp.min(self.max_backoff_ms))
    }
}

/// Run `op` until it succeeds, returns a non-retryable error, or the attempt
/// budget is exhausted.
pub(crate) async fn with_retry<T, F, Fut>(
    settings: &RetrySettings,
    operation_name: &'static str,
    mut op: F,
) -> Result<T, DriverError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DriverError>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < settings.max_attempts => {
                log::debug!(
                    "{operation_name} attempt {attempt}/{} failed, retrying: {err}",
                    settings.max_attempts
                );
                tokio::time::sleep(settings.backoff(attempt)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_settings() -> RetrySettings {
        RetrySettings {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[tokio::test]
    async fn test_retries_retryable_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, DriverError> = with_retry(&fast_settings(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(DriverError::Network {
                        message: "flaky".into(),
                        retryable: true,
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_not_found() {
        let calls = AtomicU32::new(0);
        let result: Result<(), DriverError> = with_retry(&fast_settings(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(DriverError::NotFound {
                    key: "missing".into(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(DriverError::NotFound { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), DriverError> = with_retry(&fast_settings(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(DriverError::Network {
                    message: "down".into(),
                    retryable: true,
                })
            }
        })
        .await;
        assert!(matches!(result, Err(DriverError::Network { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
