//! Fixed-delay retry around whole reconcile calls.

use backoff::backoff::Backoff;
use backoff::future::retry_notify;
use bo_sync_core::config::RetrySettings;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(1000),
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            delay: Duration::from_millis(settings.delay_ms),
        }
    }
}

/// Constant delay, bounded number of retries.
#[derive(Debug, Clone)]
struct FixedBackoff {
    delay: Duration,
    retries: u32,
    remaining: u32,
}

impl FixedBackoff {
    fn new(policy: RetryPolicy) -> Self {
        let retries = policy.max_attempts.saturating_sub(1);
        Self {
            delay: policy.delay,
            retries,
            remaining: retries,
        }
    }
}

impl Backoff for FixedBackoff {
    fn reset(&mut self) {
        self.remaining = self.retries;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.delay)
    }
}

/// Runs `operation` until it succeeds, fails permanently or runs out of
/// attempts. Only [`SyncError::is_transient`] failures are retried.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_notify(
        FixedBackoff::new(policy),
        || {
            let attempt = operation();
            async move {
                attempt.await.map_err(|error| {
                    if error.is_transient() {
                        backoff::Error::transient(error)
                    } else {
                        debug!(operation = name, "Non-retryable error: {}", error);
                        backoff::Error::permanent(error)
                    }
                })
            }
        },
        |error: SyncError, wait: Duration| {
            warn!(
                operation = name,
                wait_ms = wait.as_millis() as u64,
                "Retryable error occurred: {}",
                error
            );
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use bo_sync_core::api::DirectoryError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(1),
        }
    }

    fn unavailable() -> SyncError {
        SyncError::Directory(DirectoryError::Server {
            status: 503,
            message: "down".to_string(),
        })
    }

    #[test]
    fn test_fixed_backoff_sequence() {
        let mut backoff = FixedBackoff::new(RetryPolicy::default());
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(1000)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(1000)));
        assert_eq!(backoff.next_backoff(), None);
        backoff.reset();
        assert!(backoff.next_backoff().is_some());
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let attempts = AtomicU32::new(0);
        let result = with_retry(quick(3), "reports", || async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(unavailable())
            } else {
                Ok(7usize)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let attempts = AtomicU32::new(0);
        let result: Result<usize> = with_retry(quick(3), "reports", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(unavailable())
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<usize> = with_retry(quick(3), "reports", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(SyncError::validation("Report ID cannot be empty"))
        })
        .await;

        assert!(matches!(result, Err(SyncError::Validation(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
