//! Read access to the cluster under test.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::sync::Arc;
use std::time::Duration;

use crate::error::E2eError;
use crate::Result;

/// Label carried by control-plane nodes
pub const LABEL_CONTROL_PLANE_NODE: &str = "node-role.kubernetes.io/control-plane";

/// Selector matching kube-apiserver static pods
pub const APISERVER_POD_SELECTOR: &str = "component=kube-apiserver";

/// Namespace of the control-plane static pods
pub const NAMESPACE_SYSTEM: &str = "kube-system";

/// Connection timeout for clients built from fetched kubeconfigs
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Read timeout for clients built from fetched kubeconfigs
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Listing operations the verifiers need.
///
/// The two lists are independent eventually-consistent reads.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List nodes, optionally filtered by a label selector.
    async fn list_nodes(&self, label_selector: Option<&str>) -> Result<Vec<Node>>;

    /// List pods in `namespace` matching `label_selector`.
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>>;
}

/// Builds a [`ClusterApi`] from kubeconfig bytes.
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(&self, kubeconfig: &[u8]) -> Result<Arc<dyn ClusterApi>>;
}

/// [`ClusterApi`] over a `kube` client
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Create a client from raw kubeconfig YAML.
    pub async fn from_kubeconfig(kubeconfig: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(kubeconfig)
            .map_err(|e| E2eError::Kube(format!("kubeconfig is not UTF-8: {}", e)))?;
        let kubeconfig = Kubeconfig::from_yaml(text)
            .map_err(|e| E2eError::Kube(format!("failed to parse kubeconfig: {}", e)))?;

        let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| E2eError::Kube(format!("failed to load kubeconfig: {}", e)))?;
        config.connect_timeout = Some(CONNECT_TIMEOUT);
        config.read_timeout = Some(READ_TIMEOUT);

        Ok(Self::new(Client::try_from(config)?))
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn list_nodes(&self, label_selector: Option<&str>) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let params = match label_selector {
            Some(selector) => ListParams::default().labels(selector),
            None => ListParams::default(),
        };
        Ok(api.list(&params).await?.items)
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(label_selector);
        Ok(api.list(&params).await?.items)
    }
}

/// Connector producing [`KubeClusterApi`] clients
#[derive(Debug, Default, Clone, Copy)]
pub struct KubeConnector;

#[async_trait]
impl ClusterConnector for KubeConnector {
    async fn connect(&self, kubeconfig: &[u8]) -> Result<Arc<dyn ClusterApi>> {
        Ok(Arc::new(KubeClusterApi::from_kubeconfig(kubeconfig).await?))
    }
}
