//! Waiting for a cluster to converge on its declared node count.
//!
//! Modeled as a three-state machine: the waiter stays in
//! [`ConvergenceState::Polling`] until a listing shows exactly the expected
//! number of nodes, all Ready, or until the horizon elapses.

use k8s_openapi::api::core::v1::Node;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::{Clock, TokioClock};
use crate::cluster::ClusterApi;
use crate::error::E2eError;
use crate::Result;

/// Default time between node listings
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default maximum time to wait for convergence
pub const DEFAULT_HORIZON: Duration = Duration::from_secs(10 * 60);

/// Polling cadence and horizon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    pub interval: Duration,
    pub horizon: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            horizon: DEFAULT_HORIZON,
        }
    }
}

impl WaitConfig {
    pub fn new(interval: Duration, horizon: Duration) -> Self {
        Self { interval, horizon }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceState {
    Polling,
    Ready,
    TimedOut,
}

/// Whether the node reports a `Ready` condition with status `True`.
pub fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| conds.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
        .unwrap_or(false)
}

/// Classify one listing: Ready only on an exact count with every node Ready.
pub fn evaluate_nodes(nodes: &[Node], expected: usize) -> ConvergenceState {
    if nodes.len() == expected && nodes.iter().all(node_is_ready) {
        ConvergenceState::Ready
    } else {
        ConvergenceState::Polling
    }
}

/// Polls the cluster until it converges or the horizon elapses.
pub struct ConvergenceWaiter {
    cluster: Arc<dyn ClusterApi>,
    clock: Arc<dyn Clock>,
    config: WaitConfig,
    state: ConvergenceState,
    /// Clock reading at the first poll; the horizon counts from here.
    started: Option<Duration>,
}

impl ConvergenceWaiter {
    pub fn new(cluster: Arc<dyn ClusterApi>, config: WaitConfig) -> Self {
        Self::with_clock(cluster, config, Arc::new(TokioClock::new()))
    }

    pub fn with_clock(cluster: Arc<dyn ClusterApi>, config: WaitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            cluster,
            clock,
            config,
            state: ConvergenceState::Polling,
            started: None,
        }
    }

    pub fn state(&self) -> ConvergenceState {
        self.state
    }

    /// Time spent polling so far (zero before the first poll).
    pub fn waited(&self) -> Duration {
        match self.started {
            Some(start) => self.clock.elapsed().saturating_sub(start),
            None => Duration::ZERO,
        }
    }

    /// Run one poll and return the resulting state.
    ///
    /// A failed listing keeps the waiter polling; the control plane may not
    /// be reachable yet.
    pub async fn tick(&mut self, expected: usize) -> ConvergenceState {
        if self.state != ConvergenceState::Polling {
            return self.state;
        }
        if self.started.is_none() {
            self.started = Some(self.clock.elapsed());
        }

        match self.cluster.list_nodes(None).await {
            Ok(nodes) => {
                let ready = nodes.iter().filter(|n| node_is_ready(n)).count();
                debug!(
                    expected = expected,
                    observed = nodes.len(),
                    ready = ready,
                    "Node readiness snapshot"
                );
                self.state = evaluate_nodes(&nodes, expected);
            }
            Err(e) => {
                warn!(error = %e, "Listing nodes failed, still waiting");
            }
        }

        if self.state == ConvergenceState::Polling && self.waited() >= self.config.horizon {
            self.state = ConvergenceState::TimedOut;
        }
        self.state
    }

    /// Block until `expected` nodes are Ready.
    ///
    /// Returns [`E2eError::Timeout`] if the cluster never converges.
    pub async fn wait_for_nodes_ready(&mut self, expected: usize) -> Result<()> {
        info!(
            expected = expected,
            interval_s = self.config.interval.as_secs(),
            horizon_s = self.config.horizon.as_secs(),
            "Waiting for nodes to become ready"
        );

        loop {
            match self.tick(expected).await {
                ConvergenceState::Ready => {
                    info!(expected = expected, waited = ?self.waited(), "All nodes ready");
                    return Ok(());
                }
                ConvergenceState::TimedOut => {
                    return Err(E2eError::Timeout {
                        elapsed: self.waited(),
                        message: format!("{} nodes did not become ready", expected),
                    });
                }
                ConvergenceState::Polling => self.clock.sleep(self.config.interval).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{node, FakeClusterApi, ManualClock};

    fn waiter(api: Arc<FakeClusterApi>, clock: Arc<ManualClock>) -> ConvergenceWaiter {
        ConvergenceWaiter::with_clock(
            api,
            WaitConfig::new(Duration::from_secs(5), Duration::from_secs(60)),
            clock,
        )
    }

    #[test]
    fn test_evaluate_requires_exact_count() {
        let nodes = vec![node("a", "v1.27.3", true), node("b", "v1.27.3", true)];
        assert_eq!(evaluate_nodes(&nodes, 2), ConvergenceState::Ready);
        assert_eq!(evaluate_nodes(&nodes, 3), ConvergenceState::Polling);
        assert_eq!(evaluate_nodes(&nodes, 1), ConvergenceState::Polling);
    }

    #[test]
    fn test_node_without_ready_condition_is_not_ready() {
        let mut n = node("a", "v1.27.3", true);
        n.status.as_mut().unwrap().conditions = None;
        assert!(!node_is_ready(&n));
        assert_eq!(evaluate_nodes(&[n], 1), ConvergenceState::Polling);
    }

    #[tokio::test]
    async fn test_ready_after_nodes_join() {
        let api = Arc::new(FakeClusterApi::new().with_node_snapshots(vec![
            vec![node("cp-0", "v1.27.3", false)],
            vec![node("cp-0", "v1.27.3", true), node("w-0", "v1.27.3", false)],
            vec![node("cp-0", "v1.27.3", true), node("w-0", "v1.27.3", true)],
        ]));
        let clock = Arc::new(ManualClock::new());
        let mut w = waiter(api.clone(), clock.clone());

        w.wait_for_nodes_ready(2).await.expect("should converge");
        assert_eq!(w.state(), ConvergenceState::Ready);
        assert_eq!(api.node_list_count(), 3);
        assert_eq!(clock.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_one_not_ready_node_times_out() {
        let api = Arc::new(FakeClusterApi::new().with_nodes(vec![
            node("cp-0", "v1.27.3", true),
            node("cp-1", "v1.27.3", true),
            node("cp-2", "v1.27.3", false),
        ]));
        let clock = Arc::new(ManualClock::new());
        let mut w = waiter(api.clone(), clock.clone());

        let err = w.wait_for_nodes_ready(3).await.unwrap_err();
        assert!(matches!(err, E2eError::Timeout { .. }), "got {:?}", err);
        assert_eq!(w.state(), ConvergenceState::TimedOut);
        assert!(clock.elapsed() >= Duration::from_secs(60));
        // 0s, 5s, ..., 60s
        assert_eq!(api.node_list_count(), 13);
    }

    #[tokio::test]
    async fn test_extra_node_keeps_polling() {
        let api = Arc::new(FakeClusterApi::new().with_nodes(vec![
            node("a", "v1.27.3", true),
            node("b", "v1.27.3", true),
        ]));
        let clock = Arc::new(ManualClock::new());
        let mut w = waiter(api, clock);

        assert_eq!(w.tick(1).await, ConvergenceState::Polling);
    }

    #[tokio::test]
    async fn test_list_failures_are_not_fatal() {
        let api = Arc::new(
            FakeClusterApi::new()
                .failing_lists(3)
                .with_nodes(vec![node("cp-0", "v1.27.3", true)]),
        );
        let clock = Arc::new(ManualClock::new());
        let mut w = waiter(api.clone(), clock.clone());

        w.wait_for_nodes_ready(1).await.expect("should converge after API comes up");
        assert_eq!(api.node_list_count(), 4);
        assert_eq!(clock.sleep_count(), 3);
    }

    #[tokio::test]
    async fn test_horizon_counts_from_first_poll() {
        let api = Arc::new(FakeClusterApi::new().with_node_snapshots(vec![
            vec![node("cp-0", "v1.27.3", false)],
            vec![node("cp-0", "v1.27.3", true)],
        ]));
        let clock = Arc::new(ManualClock::new());
        clock.advance(Duration::from_secs(300));
        let mut w = waiter(api.clone(), clock.clone());

        w.wait_for_nodes_ready(1).await.expect("earlier clock time must not count");
        assert_eq!(api.node_list_count(), 2);
        assert_eq!(w.waited(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_timeout_reports_time_spent_polling() {
        let api = Arc::new(FakeClusterApi::new().with_nodes(vec![node("cp-0", "v1.27.3", false)]));
        let clock = Arc::new(ManualClock::new());
        clock.advance(Duration::from_secs(1000));
        let mut w = waiter(api.clone(), clock);

        match w.wait_for_nodes_ready(1).await {
            Err(E2eError::Timeout { elapsed, .. }) => assert_eq!(elapsed, Duration::from_secs(60)),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(api.node_list_count(), 13);
    }

    #[tokio::test]
    async fn test_terminal_state_is_sticky() {
        let api = Arc::new(FakeClusterApi::new().with_nodes(vec![node("a", "v1.27.3", true)]));
        let clock = Arc::new(ManualClock::new());
        let mut w = waiter(api.clone(), clock);

        assert_eq!(w.tick(1).await, ConvergenceState::Ready);
        assert_eq!(w.tick(5).await, ConvergenceState::Ready);
        assert_eq!(api.node_list_count(), 1);
    }
}
