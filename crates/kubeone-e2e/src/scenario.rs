//! End-to-end test flows built from the harness components.

use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::clock::{Clock, TokioClock};
use crate::cluster::{ClusterConnector, NAMESPACE_SYSTEM};
use crate::convergence::{ConvergenceWaiter, WaitConfig};
use crate::kubeone::KubeoneBin;
use crate::process::ProcessRunner;
use crate::render::ManifestData;
use crate::retry::RetryPolicy;
use crate::sonobuoy::{run_conformance, SonobuoyBin, SonobuoyConfig, SonobuoyMode};
use crate::version::VersionVerifier;
use crate::Result;

/// The basic cluster check: credentials, convergence, version consistency.
pub struct BasicTest {
    wait: WaitConfig,
    retry: RetryPolicy,
    namespace: String,
    clock: Arc<dyn Clock>,
}

impl Default for BasicTest {
    fn default() -> Self {
        Self {
            wait: WaitConfig::default(),
            retry: RetryPolicy::default(),
            namespace: NAMESPACE_SYSTEM.to_string(),
            clock: Arc::new(TokioClock::new()),
        }
    }
}

impl BasicTest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_wait(mut self, wait: WaitConfig) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run the check against the cluster described by `k1`.
    pub async fn run(
        &self,
        k1: &KubeoneBin,
        connector: &dyn ClusterConnector,
        data: &ManifestData,
    ) -> Result<()> {
        let manifest = k1.manifest().await?;
        let expected = manifest.expected_ready_node_count();
        info!(expected_nodes = expected, version = %data.version, "Running basic test");

        let kubeconfig = self
            .retry
            .retry_with_clock(self.clock.as_ref(), "kubeone kubeconfig", || k1.kubeconfig())
            .await?;

        let cluster = connector.connect(&kubeconfig).await?;

        ConvergenceWaiter::with_clock(cluster.clone(), self.wait, self.clock.clone())
            .wait_for_nodes_ready(expected)
            .await?;

        VersionVerifier::new(cluster)
            .verify(&data.version, &self.namespace)
            .await
    }
}

/// Run the conformance suite against the cluster described by `k1`.
///
/// The kubeconfig is written to `dir`, which is also sonobuoy's work dir.
pub async fn sonobuoy_run(
    k1: &KubeoneBin,
    mode: SonobuoyMode,
    dir: &Path,
    config: SonobuoyConfig,
    runner: Arc<dyn ProcessRunner>,
) -> Result<()> {
    let kubeconfig = k1.kubeconfig_path(dir).await?;
    let sonobuoy = SonobuoyBin::new(config, kubeconfig, dir, runner);
    run_conformance(&sonobuoy, mode).await
}
