//! Adapter for the `kubeone` binary
//!
//! Each call is one subprocess invocation; the adapter holds no cluster
//! state and never retries. Wrap credential retrieval in a
//! [`RetryPolicy`](crate::retry::RetryPolicy) while the control plane forms.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::error::E2eError;
use crate::process::{ProcessCommand, ProcessOutput, ProcessRunner};
use crate::Result;

/// Binary used when none is configured
pub const DEFAULT_KUBEONE_BIN: &str = "../../dist/kubeone";

/// A machine listed in the manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HostConfig {
    pub public_address: Option<String>,
    pub private_address: Option<String>,
    pub hostname: Option<String>,
}

/// A group of statically provisioned hosts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostGroup {
    pub hosts: Vec<HostConfig>,
}

/// A machine-controller managed worker pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicWorker {
    pub name: String,
    pub replicas: Option<u32>,
}

/// Versions section of the manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionConfig {
    pub kubernetes: Option<String>,
}

/// The subset of the KubeOneCluster manifest the harness relies on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterManifest {
    pub name: Option<String>,
    pub versions: VersionConfig,
    pub control_plane: HostGroup,
    pub static_workers: HostGroup,
    pub dynamic_workers: Vec<DynamicWorker>,
}

impl ClusterManifest {
    /// Control-plane hosts + static workers + dynamic replicas (unset = 0).
    pub fn expected_ready_node_count(&self) -> usize {
        self.control_plane.hosts.len()
            + self.static_workers.hosts.len()
            + self
                .dynamic_workers
                .iter()
                .map(|w| w.replicas.unwrap_or(0) as usize)
                .sum::<usize>()
    }
}

/// Invokes `kubeone` against one manifest and Terraform output.
#[derive(Clone)]
pub struct KubeoneBin {
    bin: PathBuf,
    dir: PathBuf,
    tfjson_path: String,
    manifest_path: PathBuf,
    runner: Arc<dyn ProcessRunner>,
}

impl KubeoneBin {
    /// `terraform_path` is the working directory; the Terraform output is
    /// read from it (`--tfjson .`).
    pub fn new(
        terraform_path: impl Into<PathBuf>,
        manifest_path: impl Into<PathBuf>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            bin: PathBuf::from(DEFAULT_KUBEONE_BIN),
            dir: terraform_path.into(),
            tfjson_path: ".".to_string(),
            manifest_path: manifest_path.into(),
            runner,
        }
    }

    /// Use a specific binary, e.g. one acquired from the release cache
    pub fn with_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.bin = bin.into();
        self
    }

    pub fn with_tfjson(mut self, tfjson_path: impl Into<String>) -> Self {
        self.tfjson_path = tfjson_path.into();
        self
    }

    pub fn bin(&self) -> &Path {
        &self.bin
    }

    fn command(&self, args: &[&str]) -> ProcessCommand {
        ProcessCommand::new(self.bin.to_string_lossy())
            .args(args.iter().copied())
            .arg("--manifest")
            .arg(self.manifest_path.to_string_lossy())
            .arg("--tfjson")
            .arg(self.tfjson_path.clone())
            .current_dir(&self.dir)
    }

    async fn run(&self, args: &[&str]) -> Result<ProcessOutput> {
        let cmd = self.command(args);
        self.runner.execute(&cmd).await?.check(&cmd)
    }

    /// Parsed manifest after defaulting (`kubeone config dump`).
    pub async fn manifest(&self) -> Result<ClusterManifest> {
        let output = self.run(&["config", "dump"]).await?;
        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Err(E2eError::Manifest("empty output from config dump".to_string()));
        }
        Ok(serde_yaml::from_slice(&output.stdout)?)
    }

    /// Admin kubeconfig of the cluster (`kubeone kubeconfig`).
    pub async fn kubeconfig(&self) -> Result<Vec<u8>> {
        let output = self.run(&["kubeconfig"]).await?;
        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Err(E2eError::Credentials(
                "kubeone kubeconfig returned no data".to_string(),
            ));
        }
        Ok(output.stdout)
    }

    /// Fetch the kubeconfig and store it as `<dir>/kubeconfig`.
    pub async fn kubeconfig_path(&self, dir: &Path) -> Result<PathBuf> {
        let kubeconfig = self.kubeconfig().await?;
        let path = dir.join("kubeconfig");
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(0o600)
            .open(&path)?;
        file.write_all(&kubeconfig)?;
        Ok(path)
    }

    /// Provision or upgrade the cluster (`kubeone apply`).
    pub async fn apply(&self) -> Result<()> {
        info!(bin = %self.bin.display(), "kubeone apply");
        self.run(&["apply", "--auto-approve"]).await?;
        Ok(())
    }

    /// Tear the cluster down (`kubeone reset`).
    pub async fn reset(&self) -> Result<()> {
        info!(bin = %self.bin.display(), "kubeone reset");
        self.run(&["reset", "--auto-approve", "--destroy-workers", "--remove-binaries"])
            .await?;
        Ok(())
    }
}
