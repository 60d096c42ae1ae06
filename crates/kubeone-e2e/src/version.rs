//! Control-plane version consistency checks.
//!
//! Every control-plane node's kubelet and every kube-apiserver pod must report
//! the same semantic version as the target. Comparison is by semver
//! precedence, never by string equality.

use semver::Version;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cluster::{ClusterApi, APISERVER_POD_SELECTOR, LABEL_CONTROL_PLANE_NODE};
use crate::error::E2eError;
use crate::Result;

/// Parse a version as strict semver, tolerating one leading `v`.
pub fn parse_version(input: &str) -> Result<Version> {
    let trimmed = input.strip_prefix('v').unwrap_or(input);
    Version::parse(trimmed).map_err(|e| E2eError::invalid_version(input, e))
}

/// Extract the version tag of an image reference such as
/// `registry.k8s.io/kube-apiserver:v1.27.3`.
///
/// The reference must split on `:` into exactly two parts.
pub fn parse_container_image_version(image: &str) -> Result<Version> {
    let parts: Vec<&str> = image.split(':').collect();
    if parts.len() != 2 {
        return Err(E2eError::InvalidImage(image.to_string()));
    }
    parse_version(parts[1])
}

/// Same version for verification purposes (build metadata ignored).
pub fn versions_match(expected: &Version, actual: &Version) -> bool {
    expected.cmp_precedence(actual) == Ordering::Equal
}

/// Verifies kubelet and kube-apiserver versions against one target.
pub struct VersionVerifier {
    cluster: Arc<dyn ClusterApi>,
}

impl VersionVerifier {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    /// Fail on the first control-plane component not running `target_version`.
    pub async fn verify(&self, target_version: &str, namespace: &str) -> Result<()> {
        let expected = parse_version(target_version)?;

        let nodes = self
            .cluster
            .list_nodes(Some(LABEL_CONTROL_PLANE_NODE))
            .await
            .map_err(|e| E2eError::Kube(format!("failed to list nodes: {}", e)))?;

        for node in &nodes {
            let name = node.metadata.name.as_deref().unwrap_or("<unnamed>");
            let reported = node
                .status
                .as_ref()
                .and_then(|s| s.node_info.as_ref())
                .map(|i| i.kubelet_version.as_str())
                .unwrap_or_default();
            let kubelet = parse_version(reported)?;
            debug!(node = %name, kubelet = %kubelet, "Checking kubelet version");

            if !versions_match(&expected, &kubelet) {
                return Err(E2eError::VersionMismatch {
                    component: "kubelet".to_string(),
                    expected: expected.to_string(),
                    actual: kubelet.to_string(),
                });
            }
        }

        let pods = self
            .cluster
            .list_pods(namespace, APISERVER_POD_SELECTOR)
            .await
            .map_err(|e| E2eError::Kube(format!("unable to list apiserver pods: {}", e)))?;

        for pod in &pods {
            let name = pod.metadata.name.as_deref().unwrap_or("<unnamed>");
            let image = pod
                .spec
                .as_ref()
                .and_then(|s| s.containers.first())
                .and_then(|c| c.image.as_deref())
                .ok_or_else(|| E2eError::InvalidImage(format!("pod {} has no container image", name)))?;
            let apiserver = parse_container_image_version(image)?;
            debug!(pod = %name, apiserver = %apiserver, "Checking apiserver version");

            if !versions_match(&expected, &apiserver) {
                return Err(E2eError::VersionMismatch {
                    component: "apiserver".to_string(),
                    expected: expected.to_string(),
                    actual: apiserver.to_string(),
                });
            }
        }

        info!(
            version = %expected,
            nodes = nodes.len(),
            apiservers = pods.len(),
            "Control plane versions consistent"
        );
        Ok(())
    }
}
