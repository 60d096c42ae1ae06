//! Time source used by the polling and retry loops.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// Monotonic clock abstraction.
///
/// Production code uses [`TokioClock`]; tests use
/// [`ManualClock`](crate::fakes::ManualClock), which advances instantly on
/// `sleep` so horizon expiry can be simulated without waiting.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock was created.
    fn elapsed(&self) -> Duration;

    /// Suspend for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `tokio::time`.
#[derive(Debug, Clone)]
pub struct TokioClock {
    start: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
