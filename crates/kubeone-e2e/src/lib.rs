//! KubeOne E2E: convergence and consistency checks for KubeOne clusters
//!
//! This crate drives a released `kubeone` binary against a provisioned
//! cluster and verifies the result:
//!
//! - [`artifact`]: download and cache `kubeone` releases per run
//! - [`render`]: expand manifest templates with a `required` helper
//! - [`kubeone`]: manifest and kubeconfig retrieval through the binary
//! - [`convergence`]: wait until the declared node count is Ready
//! - [`version`]: kubelet and kube-apiserver version consistency
//! - [`sonobuoy`]: conformance runs
//!
//! External processes, the cluster API and time are reached through traits
//! ([`ProcessRunner`], [`ClusterApi`], [`Clock`]) with in-memory
//! implementations in [`fakes`].

pub mod artifact;
pub mod clock;
pub mod cluster;
pub mod convergence;
pub mod error;
pub mod fakes;
pub mod kubeone;
pub mod naming;
pub mod process;
pub mod render;
pub mod retry;
pub mod scenario;
pub mod sonobuoy;
pub mod telemetry;
pub mod version;

pub use artifact::{ArtifactCache, ArtifactConfig, ArtifactSource, HttpArtifactSource};
pub use clock::{Clock, TokioClock};
pub use cluster::{ClusterApi, ClusterConnector, KubeClusterApi, KubeConnector};
pub use convergence::{ConvergenceState, ConvergenceWaiter, WaitConfig};
pub use error::E2eError;
pub use kubeone::{ClusterManifest, KubeoneBin};
pub use naming::cluster_name;
pub use process::{ProcessCommand, ProcessOutput, ProcessRunner, TokioProcessRunner};
pub use render::{ManifestData, ManifestRenderer};
pub use retry::{NeverRetry, RetryAll, RetryPolicy};
pub use scenario::{sonobuoy_run, BasicTest};
pub use sonobuoy::{SonobuoyBin, SonobuoyConfig, SonobuoyMode, SonobuoyReport};
pub use telemetry::init_tracing;
pub use version::{parse_container_image_version, parse_version, VersionVerifier};

/// Result type for harness operations
pub type Result<T> = std::result::Result<T, E2eError>;
