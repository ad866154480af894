//! Bounded retry with exponential backoff
//!
//! Shared by the knowledge-base resolver and the translation fallback.
//!
//! **Algorithm:**
//! 1. Attempt operation
//! 2. If successful, return result
//! 3. If the error is retryable and attempts remain: log WARN, back off, retry
//! 4. Otherwise return the last error with the attempt count
//!
//! Backoff starts at `initial_backoff`, doubles per retry, capped at
//! `max_backoff`. Cancellation interrupts the backoff sleep; no new attempt is
//! started once the token is cancelled.

use pcal_common::config::RetryPolicy;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Final error after retries stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure<E> {
    /// Attempts actually made (>= 1 unless cancelled before the first)
    pub attempts: u32,
    pub error: E,
    /// Stopped because the token was cancelled
    pub cancelled: bool,
}

/// Run `operation` until it succeeds, fails permanently, or the policy is exhausted
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g., "knowledge-base batch 3")
/// * `policy` - Retry bounds
/// * `cancel` - Global cancellation signal
/// * `cancelled_error` - Error reported when cancelled before any attempt
/// * `is_retryable` - Classifies errors
/// * `operation` - Async closure performing one attempt
pub async fn retry_with_backoff<F, Fut, T, E, R>(
    operation_name: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    cancelled_error: E,
    is_retryable: R,
    mut operation: F,
) -> Result<T, RetryFailure<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 0u32;
    let mut last_error = cancelled_error;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryFailure {
                attempts: attempt,
                error: last_error,
                cancelled: true,
            });
        }

        attempt += 1;
        if attempt > 1 {
            tracing::debug!(operation = operation_name, attempt, "Retrying operation");
        }

        let err = match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => err,
        };

        if !is_retryable(&err) {
            tracing::debug!(
                operation = operation_name,
                attempt,
                error = %err,
                "Non-retryable error, giving up"
            );
            return Err(RetryFailure {
                attempts: attempt,
                error: err,
                cancelled: false,
            });
        }

        if attempt >= max_attempts {
            return Err(RetryFailure {
                attempts: attempt,
                error: err,
                cancelled: false,
            });
        }

        let backoff = policy.backoff_for(attempt);
        tracing::warn!(
            operation = operation_name,
            attempt,
            max_attempts,
            backoff_ms = backoff.as_millis() as u64,
            error = %err,
            "Operation failed, will retry after backoff"
        );
        last_error = err;

        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum TestError {
        Transient,
        Permanent,
        Cancelled,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    fn retryable(e: &TestError) -> bool {
        *e == TestError::Transient
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_attempt() {
        let result = retry_with_backoff(
            "test_op",
            &policy(3),
            &CancellationToken::new(),
            TestError::Cancelled,
            retryable,
            || async { Ok::<i32, TestError>(42) },
        )
        .await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_errors() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = retry_with_backoff(
            "test_op",
            &policy(3),
            &CancellationToken::new(),
            TestError::Cancelled,
            retryable,
            || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(TestError::Transient)
                    } else {
                        Ok(7)
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts_bound() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = retry_with_backoff(
            "test_op",
            &policy(2),
            &CancellationToken::new(),
            TestError::Cancelled,
            retryable,
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<i32, TestError>(TestError::Transient) }
            },
        )
        .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.error, TestError::Transient);
        assert!(!failure.cancelled);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_fails_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = retry_with_backoff(
            "test_op",
            &policy(5),
            &CancellationToken::new(),
            TestError::Cancelled,
            retryable,
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<i32, TestError>(TestError::Permanent) }
            },
        )
        .await;

        assert_eq!(result.unwrap_err().error, TestError::Permanent);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = retry_with_backoff(
            "test_op",
            &policy(5),
            &cancel,
            TestError::Cancelled,
            retryable,
            || async { Ok::<i32, TestError>(1) },
        )
        .await;

        let failure = result.unwrap_err();
        assert!(failure.cancelled);
        assert_eq!(failure.attempts, 0);
        assert_eq!(failure.error, TestError::Cancelled);
    }
}
