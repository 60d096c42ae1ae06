//! KubeOne E2E - command-line driver
//!
//! The `k1e2e` command runs the e2e building blocks outside of `go test`.
//!
//! ## Commands
//!
//! - `download`: fetch and cache a `kubeone` release
//! - `render`: expand a manifest template
//! - `jobs`: generate the Prow presubmit matrix
//! - `basic`: wait for a cluster to converge and check its versions
//! - `conformance`: run sonobuoy against a cluster

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};

use kubeone_e2e::{
    cluster_name, init_tracing, sonobuoy_run, ArtifactCache, ArtifactConfig, BasicTest,
    HttpArtifactSource, KubeConnector, KubeoneBin, ManifestData, ManifestRenderer,
    SonobuoyConfig, SonobuoyMode, TokioProcessRunner, WaitConfig,
};
use kubeone_e2e_ci::JobMatrix;

#[derive(Parser)]
#[command(name = "k1e2e")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "KubeOne end-to-end test driver", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// How to locate the `kubeone` binary.
#[derive(clap::Args, Debug)]
struct KubeoneArgs {
    /// Terraform directory (working directory, `--tfjson .`)
    #[arg(long, default_value = ".")]
    terraform: PathBuf,

    /// Rendered KubeOneCluster manifest
    #[arg(long)]
    manifest: PathBuf,

    /// Path to an existing kubeone binary
    #[arg(long, conflicts_with = "kubeone_version")]
    kubeone_bin: Option<PathBuf>,

    /// Download this kubeone release instead of using a local binary
    #[arg(long)]
    kubeone_version: Option<String>,

    /// Directory for downloads and generated files
    #[arg(long, default_value = ".")]
    scratch: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a kubeone release into the scratch directory
    Download {
        /// Release version, e.g. 1.7.2
        version: String,

        /// Directory to cache the binary in
        #[arg(long, default_value = ".")]
        scratch: PathBuf,

        /// Release download base URL
        #[arg(long, env = "KUBEONE_RELEASE_URL")]
        release_url: Option<String>,

        /// Expected SHA-256 of the release archive
        #[arg(long)]
        sha256: Option<String>,
    },

    /// Render a manifest template
    Render {
        /// Template file
        template: PathBuf,

        /// Kubernetes version substituted for VERSION
        #[arg(long)]
        version: String,

        /// Directory the rendered manifest is written to
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },

    /// Generate the Prow presubmit matrix as JSON
    Jobs {
        /// YAML or JSON list of job entries
        input: PathBuf,

        /// Repository the presubmits are registered for
        #[arg(long, default_value = kubeone_e2e_ci::matrix::DEFAULT_REPOSITORY)]
        repository: String,

        /// Write the document here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Wait for the cluster to converge and verify control-plane versions
    Basic {
        #[command(flatten)]
        kubeone: KubeoneArgs,

        /// Expected Kubernetes version
        #[arg(long)]
        version: String,

        /// Run `kubeone apply` first
        #[arg(long)]
        apply: bool,

        /// Run `kubeone reset` afterwards, even if the check failed
        #[arg(long)]
        reset: bool,

        /// Seconds between node polls
        #[arg(long, default_value = "5")]
        interval: u64,

        /// Seconds to wait for convergence
        #[arg(long, default_value = "600")]
        horizon: u64,
    },

    /// Run the sonobuoy conformance suite
    Conformance {
        #[command(flatten)]
        kubeone: KubeoneArgs,

        /// quick, non-disruptive-conformance or certified-conformance
        #[arg(long, default_value = "quick")]
        mode: String,

        /// Path to the sonobuoy binary
        #[arg(long, env = "SONOBUOY_BIN", default_value = "sonobuoy")]
        sonobuoy_bin: String,

        /// Seconds to let `sonobuoy wait` run before killing it
        #[arg(long, default_value = "10800")]
        wait_timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Download {
            version,
            scratch,
            release_url,
            sha256,
        } => {
            let path = cmd_download(&version, &scratch, release_url.as_deref(), sha256.as_deref()).await?;
            println!("{}", path.display());
            Ok(())
        }
        Commands::Render {
            template,
            version,
            out_dir,
        } => {
            let path = cmd_render(&template, &version, &out_dir)?;
            println!("{}", path.display());
            Ok(())
        }
        Commands::Jobs {
            input,
            repository,
            output,
        } => {
            let json = cmd_jobs(&input, &repository)?;
            match output {
                Some(path) => std::fs::write(&path, json)
                    .with_context(|| format!("Failed to write {}", path.display())),
                None => {
                    println!("{}", json);
                    Ok(())
                }
            }
        }
        Commands::Basic {
            kubeone,
            version,
            apply,
            reset,
            interval,
            horizon,
        } => {
            let wait = WaitConfig::new(Duration::from_secs(interval), Duration::from_secs(horizon));
            cmd_basic(&kubeone, &version, apply, reset, wait).await
        }
        Commands::Conformance {
            kubeone,
            mode,
            sonobuoy_bin,
            wait_timeout,
        } => {
            let config = SonobuoyConfig::new(sonobuoy_bin)
                .with_wait_timeout(Duration::from_secs(wait_timeout));
            cmd_conformance(&kubeone, &mode, config).await
        }
    }
}

async fn cmd_download(
    version: &str,
    scratch: &Path,
    release_url: Option<&str>,
    sha256: Option<&str>,
) -> Result<PathBuf> {
    let mut config = match release_url {
        Some(url) => ArtifactConfig::new(url, kubeone_e2e::artifact::DEFAULT_TOOL),
        None => ArtifactConfig::from_env(),
    };
    if let Some(digest) = sha256 {
        config = config.with_checksum(version, digest);
    }

    let source = HttpArtifactSource::new().context("Failed to build HTTP client")?;
    let cache = ArtifactCache::new(scratch, config, Arc::new(source));
    cache
        .acquire(version)
        .await
        .with_context(|| format!("Failed to acquire kubeone {}", version))
}

fn cmd_render(template: &Path, version: &str, out_dir: &Path) -> Result<PathBuf> {
    let source = std::fs::read_to_string(template)
        .with_context(|| format!("Failed to read template {}", template.display()))?;
    ManifestRenderer::new(out_dir)
        .render(&source, &ManifestData::new(version))
        .with_context(|| format!("Failed to render {}", template.display()))
}

fn cmd_jobs(input: &Path, repository: &str) -> Result<String> {
    let matrix = JobMatrix::from_file(repository, input)?;
    info!(jobs = matrix.len(), repository = %repository, "Generated job matrix");
    matrix.to_json()
}

/// Resolve the kubeone binary, downloading it when a version is given.
async fn kubeone_bin(args: &KubeoneArgs) -> Result<KubeoneBin> {
    let k1 = KubeoneBin::new(&args.terraform, &args.manifest, Arc::new(TokioProcessRunner));

    if let Some(version) = &args.kubeone_version {
        let cache = ArtifactCache::from_env(&args.scratch).context("Failed to build release cache")?;
        let bin = cache
            .acquire(version)
            .await
            .with_context(|| format!("Failed to acquire kubeone {}", version))?;
        return Ok(k1.with_bin(bin));
    }

    Ok(match &args.kubeone_bin {
        Some(bin) => k1.with_bin(bin),
        None => k1,
    })
}

async fn cmd_basic(
    args: &KubeoneArgs,
    version: &str,
    apply: bool,
    reset: bool,
    wait: WaitConfig,
) -> Result<()> {
    let k1 = kubeone_bin(args).await?;
    info!(cluster = %cluster_name(), bin = %k1.bin().display(), "Starting basic test");

    if apply {
        k1.apply().await.context("kubeone apply failed")?;
    }

    let result = BasicTest::new()
        .with_wait(wait)
        .run(&k1, &KubeConnector, &ManifestData::new(version))
        .await
        .context("Basic test failed");

    if reset {
        if let Err(e) = k1.reset().await {
            warn!(error = %e, "kubeone reset failed");
        }
    }

    result?;
    println!("✓ Cluster converged and runs Kubernetes {}", version);
    Ok(())
}

async fn cmd_conformance(args: &KubeoneArgs, mode: &str, config: SonobuoyConfig) -> Result<()> {
    let mode: SonobuoyMode = mode.parse()?;
    let k1 = kubeone_bin(args).await?;

    sonobuoy_run(
        &k1,
        mode,
        &args.scratch,
        config,
        Arc::new(TokioProcessRunner),
    )
    .await
    .with_context(|| format!("Conformance run ({}) failed", mode))?;

    println!("✓ Conformance ({}) passed", mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_basic_flags() {
        let cli = Cli::try_parse_from([
            "k1e2e",
            "--verbose",
            "basic",
            "--manifest",
            "kubeone.yaml",
            "--version",
            "1.27.3",
            "--kubeone-version",
            "1.7.2",
            "--reset",
        ])
        .unwrap();

        assert!(cli.verbose);
        match cli.command {
            Commands::Basic {
                kubeone,
                version,
                apply,
                reset,
                interval,
                horizon,
            } => {
                assert_eq!(version, "1.27.3");
                assert_eq!(kubeone.kubeone_version.as_deref(), Some("1.7.2"));
                assert_eq!(kubeone.terraform, PathBuf::from("."));
                assert!(!apply);
                assert!(reset);
                assert_eq!((interval, horizon), (5, 600));
            }
            _ => panic!("expected basic command"),
        }
    }

    #[test]
    fn test_bin_and_version_conflict() {
        let result = Cli::try_parse_from([
            "k1e2e",
            "conformance",
            "--manifest",
            "kubeone.yaml",
            "--kubeone-bin",
            "/usr/local/bin/kubeone",
            "--kubeone-version",
            "1.7.2",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cmd_render_writes_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("kubeone.yaml.tmpl");
        std::fs::write(&template, "versions:\n  kubernetes: \"{{ VERSION }}\"\n").unwrap();

        let path = cmd_render(&template, "1.27.3", dir.path()).unwrap();
        let rendered = std::fs::read_to_string(path).unwrap();
        assert!(rendered.contains("kubernetes: \"1.27.3\""));
    }

    #[test]
    fn test_cmd_render_missing_template() {
        let dir = tempfile::tempdir().unwrap();
        let err = cmd_render(&dir.path().join("missing"), "1.27.3", dir.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to read template"));
    }

    #[test]
    fn test_cmd_jobs_emits_presubmits() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("jobs.yaml");
        std::fs::write(&input, "- name: [aws, default]\n  title: TestAwsDefault\n").unwrap();

        let json = cmd_jobs(&input, "kubermatic/kubeone").unwrap();
        let doc: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            doc["presubmits"]["kubermatic/kubeone"][0]["name"],
            "pull-kubeone-e2e-aws-default"
        );
    }

    #[tokio::test]
    async fn test_cmd_conformance_rejects_unknown_mode() {
        let args = KubeoneArgs {
            terraform: PathBuf::from("."),
            manifest: PathBuf::from("kubeone.yaml"),
            kubeone_bin: None,
            kubeone_version: None,
            scratch: PathBuf::from("."),
        };
        let err = cmd_conformance(&args, "everything", SonobuoyConfig::new("sonobuoy"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown sonobuoy mode"));
    }

    #[test]
    fn test_conformance_wait_timeout_flag() {
        let cli = Cli::try_parse_from([
            "k1e2e",
            "conformance",
            "--manifest",
            "kubeone.yaml",
            "--wait-timeout",
            "600",
        ])
        .unwrap();
        match cli.command {
            Commands::Conformance { wait_timeout, .. } => assert_eq!(wait_timeout, 600),
            _ => panic!("expected conformance command"),
        }

        let cli = Cli::try_parse_from(["k1e2e", "conformance", "--manifest", "kubeone.yaml"]).unwrap();
        match cli.command {
            Commands::Conformance { wait_timeout, .. } => assert_eq!(
                Duration::from_secs(wait_timeout),
                kubeone_e2e::sonobuoy::DEFAULT_WAIT_TIMEOUT
            ),
            _ => panic!("expected conformance command"),
        }
    }
}
