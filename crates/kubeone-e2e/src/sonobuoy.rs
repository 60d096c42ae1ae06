//! Conformance runs through the `sonobuoy` binary.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::E2eError;
use crate::process::{ProcessCommand, ProcessOutput, ProcessRunner};
use crate::Result;

/// Name of the results tarball written by `retrieve`
pub const RESULTS_TARBALL: &str = "sonobuoy-results.tar.gz";

/// Upper bound for `sonobuoy wait`; certified conformance takes about two hours
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(3 * 60 * 60);

/// Which slice of the conformance suite to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SonobuoyMode {
    /// Single smoke test
    Quick,
    /// Conformance tests that do not disrupt the cluster
    NonDisruptiveConformance,
    /// Full certified conformance suite
    CertifiedConformance,
}

impl SonobuoyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SonobuoyMode::Quick => "quick",
            SonobuoyMode::NonDisruptiveConformance => "non-disruptive-conformance",
            SonobuoyMode::CertifiedConformance => "certified-conformance",
        }
    }
}

impl std::fmt::Display for SonobuoyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SonobuoyMode {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "quick" => Ok(SonobuoyMode::Quick),
            "non-disruptive-conformance" => Ok(SonobuoyMode::NonDisruptiveConformance),
            "certified-conformance" => Ok(SonobuoyMode::CertifiedConformance),
            other => Err(E2eError::Config(format!("unknown sonobuoy mode: {}", other))),
        }
    }
}

/// One failed test from `sonobuoy results --mode detailed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SonobuoyReport {
    pub name: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Sonobuoy binary configuration
#[derive(Debug, Clone)]
pub struct SonobuoyConfig {
    /// Binary path or name in `PATH`
    pub bin: String,
    /// Kill `sonobuoy wait` after this long
    pub wait_timeout: Duration,
}

impl Default for SonobuoyConfig {
    fn default() -> Self {
        Self::new(std::env::var("SONOBUOY_BIN").unwrap_or_else(|_| "sonobuoy".to_string()))
    }
}

impl SonobuoyConfig {
    pub fn new(bin: impl Into<String>) -> Self {
        SonobuoyConfig {
            bin: bin.into(),
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }

    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }
}

/// Drives one conformance run against a cluster.
pub struct SonobuoyBin {
    config: SonobuoyConfig,
    kubeconfig: PathBuf,
    workdir: PathBuf,
    runner: Arc<dyn ProcessRunner>,
}

impl SonobuoyBin {
    pub fn new(
        config: SonobuoyConfig,
        kubeconfig: impl Into<PathBuf>,
        workdir: impl Into<PathBuf>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            config,
            kubeconfig: kubeconfig.into(),
            workdir: workdir.into(),
            runner,
        }
    }

    /// Where `retrieve` stores the results tarball
    pub fn tarball(&self) -> PathBuf {
        self.workdir.join(RESULTS_TARBALL)
    }

    fn phase_command(&self, args: &[&str]) -> ProcessCommand {
        ProcessCommand::new(self.config.bin.clone())
            .args(args.iter().copied())
            .arg("--kubeconfig")
            .arg(self.kubeconfig.to_string_lossy())
            .current_dir(&self.workdir)
    }

    async fn run_phase(&self, args: &[&str]) -> Result<ProcessOutput> {
        self.execute(self.phase_command(args)).await
    }

    async fn execute(&self, cmd: ProcessCommand) -> Result<ProcessOutput> {
        self.runner.execute(&cmd).await?.check(&cmd)
    }

    pub async fn run(&self, mode: SonobuoyMode) -> Result<()> {
        info!(mode = %mode, "Starting sonobuoy");
        self.run_phase(&["run", "--mode", mode.as_str()]).await?;
        Ok(())
    }

    pub async fn wait(&self) -> Result<()> {
        info!(timeout = ?self.config.wait_timeout, "Waiting for sonobuoy to finish");
        self.execute(self.phase_command(&["wait"]).timeout(self.config.wait_timeout))
            .await?;
        Ok(())
    }

    pub async fn retrieve(&self) -> Result<()> {
        self.run_phase(&["retrieve", ".", "--filename", RESULTS_TARBALL])
            .await?;
        Ok(())
    }

    /// Failed tests from the retrieved tarball.
    pub async fn results(&self) -> Result<Vec<SonobuoyReport>> {
        let tarball = self.tarball().to_string_lossy().to_string();
        let output = self
            .run_phase(&[
                "results",
                tarball.as_str(),
                "--mode",
                "detailed",
                "--plugin",
                "e2e",
            ])
            .await?;
        parse_detailed_results(&output.stdout_lossy())
    }
}

/// Keep the `failed` entries of line-delimited detailed results.
pub fn parse_detailed_results(stdout: &str) -> Result<Vec<SonobuoyReport>> {
    let mut failed = Vec::new();
    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let report: SonobuoyReport = serde_json::from_str(line)?;
        if report.status == "failed" {
            failed.push(report);
        }
    }
    Ok(failed)
}

/// Run all phases and fail if any test failed.
pub async fn run_conformance(sonobuoy: &SonobuoyBin, mode: SonobuoyMode) -> Result<()> {
    sonobuoy.run(mode).await?;
    sonobuoy.wait().await?;
    sonobuoy.retrieve().await?;

    let report = sonobuoy.results().await?;
    if !report.is_empty() {
        warn!(failed = report.len(), "Conformance tests failed");
        return Err(E2eError::ConformanceFailed(serde_json::to_string_pretty(&report)?));
    }

    info!(mode = %mode, "Conformance passed");
    Ok(())
}
