//! Bounded retries for operations that fail while a cluster is still forming.
//!
//! A [`RetryPolicy`] is parameterised by a [`RetryClassifier`] so that call
//! sites retrying every error (`RetryPolicy<RetryAll>`) are distinguishable by
//! type from call sites that must fail fast (`RetryPolicy<NeverRetry>`).
//!
//! ```ignore
//! use kubeone_e2e::retry::RetryPolicy;
//!
//! let kubeconfig = RetryPolicy::default()
//!     .retry("kubeone kubeconfig", || k1.kubeconfig())
//!     .await?;
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use crate::clock::{Clock, TokioClock};

/// Attempts made by the default policy.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Fixed delay between attempts of the default policy.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(10);

/// Decides whether a failed attempt may be retried.
pub trait RetryClassifier: Send + Sync {
    fn is_retriable<E: Display>(&self, err: &E) -> bool;
}

/// Every error is retriable until the attempt budget runs out.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryAll;

impl RetryClassifier for RetryAll {
    fn is_retriable<E: Display>(&self, _err: &E) -> bool {
        true
    }
}

/// No error is retriable; the first failure is returned.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRetry;

impl RetryClassifier for NeverRetry {
    fn is_retriable<E: Display>(&self, _err: &E) -> bool {
        false
    }
}

/// Bounded attempts with a fixed backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy<C = RetryAll> {
    /// Maximum number of attempts (values below 1 are treated as 1)
    pub max_attempts: u32,
    /// Delay between attempts
    pub backoff: Duration,
    classifier: C,
}

impl Default for RetryPolicy<RetryAll> {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
            classifier: RetryAll,
        }
    }
}

impl RetryPolicy<RetryAll> {
    /// Retry every error up to `attempts` times.
    pub fn retry_all(attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: attempts,
            backoff,
            classifier: RetryAll,
        }
    }
}

impl RetryPolicy<NeverRetry> {
    /// Single attempt, first error wins.
    pub fn never() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
            classifier: NeverRetry,
        }
    }
}

impl<C: RetryClassifier> RetryPolicy<C> {
    /// Run `operation` under this policy, sleeping on the tokio clock.
    pub async fn retry<F, Fut, T, E>(&self, operation_name: &str, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.retry_with_clock(&TokioClock::new(), operation_name, operation)
            .await
    }

    /// Run `operation` under this policy using `clock` for backoff sleeps.
    ///
    /// Returns the first success, or the last error once the budget is
    /// exhausted or the classifier rejects an error.
    pub async fn retry_with_clock<F, Fut, T, E>(
        &self,
        clock: &dyn Clock,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if attempt >= max_attempts || !self.classifier.is_retriable(&e) {
                        error!(
                            operation = %operation_name,
                            attempt = attempt,
                            error = %e,
                            "Operation failed, giving up"
                        );
                        return Err(e);
                    }

                    warn!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        delay_ms = self.backoff.as_millis(),
                        "Operation failed, retrying"
                    );

                    clock.sleep(self.backoff).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_succeeds_immediately() {
        let policy = RetryPolicy::default();
        let result: Result<i32, &str> = policy.retry("op", || async { Ok(42) }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn test_succeeds_after_failures_and_stops() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let clock = ManualClock::new();

        let policy = RetryPolicy::retry_all(5, Duration::from_secs(1));
        let result: Result<i32, &str> = policy
            .retry_with_clock(&clock, "op", || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("fail")
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(clock.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_exhausts_budget_returns_last_error() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let clock = ManualClock::new();

        let policy = RetryPolicy::retry_all(3, Duration::from_millis(10));
        let result: Result<i32, String> = policy
            .retry_with_clock(&clock, "op", || {
                let c = c.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    Err(format!("attempt {}", n + 1))
                }
            })
            .await;

        assert_eq!(result, Err("attempt 3".to_string()));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_never_retry_fails_fast() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<i32, &str> = RetryPolicy::never()
            .retry("op", || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err("boom")
                }
            })
            .await;

        assert_eq!(result, Err("boom"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_default_policy_budget() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(policy.backoff, DEFAULT_BACKOFF);
    }
}
