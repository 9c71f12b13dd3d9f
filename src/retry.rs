//! Timeout and retry policy for provider calls.
//!
//! One policy object parameterized by `(max_attempts, base_delay, timeout)`.
//! Every attempt runs under `tokio::time::timeout`; only transient failures
//! are retried, with exponential backoff between attempts.

use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Errors that can tell whether another attempt might succeed.
pub trait Transient {
    /// Worth retrying (network hiccup, rate limit, overload).
    fn is_transient(&self) -> bool;

    /// The failure was the provider's own timeout.
    fn is_timeout(&self) -> bool {
        false
    }
}

/// How a single attempt failed.
#[derive(Debug)]
pub enum Attempt<E> {
    /// The policy timeout elapsed before the call finished.
    TimedOut(Duration),
    /// The call returned an error.
    Failed(E),
}

impl<E: fmt::Display> fmt::Display for Attempt<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attempt::TimedOut(limit) => write!(f, "timed out after {}ms", limit.as_millis()),
            Attempt::Failed(e) => write!(f, "{e}"),
        }
    }
}

/// Returned when no attempt succeeded.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    /// Attempts actually made.
    pub attempts: u32,
    /// Failure of the final attempt.
    pub last: Attempt<E>,
    /// Every attempt ended in a timeout.
    pub all_timed_out: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    timeout: Duration,
}

impl RetryPolicy {
    /// `max_attempts` counts the first call; it is clamped to at least 1.
    pub fn new(max_attempts: u32, base_delay: Duration, timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            timeout,
        }
    }

    /// A policy that times out but never retries.
    pub fn single_attempt(timeout: Duration) -> Self {
        Self::new(1, Duration::ZERO, timeout)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Delay before attempt `attempt + 1`: `base_delay * 2^(attempt - 1)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. Dropping the returned future
    /// abandons the in-flight attempt.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + fmt::Display,
    {
        let mut all_timed_out = true;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let failure = match tokio::time::timeout(self.timeout, op(attempt)).await {
                Ok(Ok(value)) => {
                    if attempt > 1 {
                        tracing::debug!(target: "providers", "{label} succeeded on attempt {attempt}");
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => {
                    if !e.is_timeout() {
                        all_timed_out = false;
                    }
                    Attempt::Failed(e)
                }
                Err(_) => Attempt::TimedOut(self.timeout),
            };

            let retryable = match &failure {
                Attempt::TimedOut(_) => true,
                Attempt::Failed(e) => e.is_transient(),
            };

            if !retryable || attempt >= self.max_attempts {
                tracing::warn!(
                    target: "providers",
                    "{label} failed after {attempt} attempt(s): {failure}"
                );
                return Err(RetryExhausted {
                    attempts: attempt,
                    last: failure,
                    all_timed_out,
                });
            }

            let delay = self.backoff(attempt);
            tracing::warn!(
                target: "providers",
                "{label} attempt {attempt}/{} failed: {failure}; retrying in {}ms",
                self.max_attempts,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Flaky,
        Fatal,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl Transient for TestError {
        fn is_transient(&self) -> bool {
            matches!(self, TestError::Flaky)
        }
    }

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_millis(200))
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn test_zero_attempts_clamped() {
        let policy = RetryPolicy::new(0, Duration::ZERO, Duration::from_secs(1));
        assert_eq!(policy.max_attempts(), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = &AtomicU32::new(0);
        let result = fast_policy(3)
            .run("test", move |_| async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError::Flaky)
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(5)
            .run("test", move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Fatal)
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert!(!err.all_timed_out);
        assert!(matches!(err.last, Attempt::Failed(TestError::Fatal)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let result: Result<(), _> = fast_policy(3)
            .run("test", |_| async { Err(TestError::Flaky) })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert!(!err.all_timed_out);
    }

    #[tokio::test]
    async fn test_timeout_applies_per_attempt() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(20));
        let result: Result<(), RetryExhausted<TestError>> = policy
            .run("test", |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 2);
        assert!(err.all_timed_out);
        assert!(matches!(err.last, Attempt::TimedOut(_)));
    }
}
