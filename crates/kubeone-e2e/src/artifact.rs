//! KubeOne release cache
//!
//! Resolves a release version to an executable in the run's scratch
//! directory, downloading and unpacking the release archive at most once.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::E2eError;
use crate::version::parse_version;
use crate::Result;

/// Default location of published KubeOne releases
pub const DEFAULT_RELEASE_URL: &str = "https://github.com/kubermatic/kubeone/releases/download";

/// Default name of the binary inside the release archive
pub const DEFAULT_TOOL: &str = "kubeone";

/// Where and what to download
#[derive(Debug, Clone)]
pub struct ArtifactConfig {
    /// Base URL; `/v<version>/<tool>_<version>_linux_amd64.zip` is appended
    pub release_url: String,
    /// Tool name, also the archive entry to extract
    pub tool: String,
    /// Pinned SHA-256 digests of release archives, keyed by version
    pub checksums: BTreeMap<String, String>,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        ArtifactConfig {
            release_url: std::env::var("KUBEONE_RELEASE_URL")
                .unwrap_or_else(|_| DEFAULT_RELEASE_URL.to_string()),
            tool: DEFAULT_TOOL.to_string(),
            checksums: BTreeMap::new(),
        }
    }
}

impl ArtifactConfig {
    /// Create a config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Create a config for a specific release server
    pub fn new(release_url: &str, tool: &str) -> Self {
        ArtifactConfig {
            release_url: release_url.trim_end_matches('/').to_string(),
            tool: tool.to_string(),
            checksums: BTreeMap::new(),
        }
    }

    /// Pin the archive digest for `version`
    pub fn with_checksum(mut self, version: &str, sha256_hex: &str) -> Self {
        self.checksums
            .insert(bare_version(version).to_string(), sha256_hex.to_ascii_lowercase());
        self
    }

    /// Download URL of the release archive for `version`
    pub fn download_url(&self, version: &str) -> String {
        format!(
            "{}/v{version}/{tool}_{version}_linux_amd64.zip",
            self.release_url,
            version = bare_version(version),
            tool = self.tool,
        )
    }
}

/// Fetches release archives.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Return the full response body for `url`.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// HTTP source backed by `reqwest`
pub struct HttpArtifactSource {
    http_client: reqwest::Client,
}

impl HttpArtifactSource {
    pub fn new() -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("kubeone-e2e/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl ArtifactSource for HttpArtifactSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(E2eError::Http(format!("GET {} returned {}", url, status)));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Per-run cache of downloaded release binaries.
///
/// The cache hit check is existence-only. Archives with a pinned digest are
/// verified before extraction, and the binary is renamed into place only
/// after it has been fully written.
pub struct ArtifactCache {
    scratch: PathBuf,
    config: ArtifactConfig,
    source: Arc<dyn ArtifactSource>,
}

impl ArtifactCache {
    pub fn new(scratch: impl Into<PathBuf>, config: ArtifactConfig, source: Arc<dyn ArtifactSource>) -> Self {
        Self {
            scratch: scratch.into(),
            config,
            source,
        }
    }

    /// Cache in `scratch` downloading over HTTP with config from the environment
    pub fn from_env(scratch: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::new(
            scratch,
            ArtifactConfig::from_env(),
            Arc::new(HttpArtifactSource::new()?),
        ))
    }

    /// Deterministic cache path for `version`
    pub fn binary_path(&self, version: &str) -> PathBuf {
        self.scratch
            .join(format!("{}-{}", self.config.tool, bare_version(version)))
    }

    /// Return the cached binary for `version`, downloading it on a miss.
    pub async fn acquire(&self, version: &str) -> Result<PathBuf> {
        parse_version(version)?;
        let version = bare_version(version);

        let bin_path = self.binary_path(version);
        if path_exists(&bin_path)? {
            debug!(version = %version, path = %bin_path.display(), "Release cache hit");
            return Ok(bin_path);
        }

        let url = self.config.download_url(version);
        info!(version = %version, url = %url, "Downloading release");
        let body = self.source.fetch(&url).await?;

        if let Some(expected) = self.config.checksums.get(version) {
            let actual = hex::encode(Sha256::digest(&body));
            if &actual != expected {
                return Err(E2eError::Integrity {
                    artifact: url,
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        let zip_path = with_suffix(&bin_path, ".zip");
        write_file(&zip_path, &body, 0o600)?;

        let tool = self.config.tool.clone();
        let target = bin_path.clone();
        tokio::task::spawn_blocking(move || extract_entry(&zip_path, &tool, &target))
            .await
            .map_err(|e| E2eError::Io(std::io::Error::other(e)))??;

        info!(version = %version, path = %bin_path.display(), "Release extracted");
        Ok(bin_path)
    }
}

/// Release version without the optional `v` prefix; `v1.7.2` and `1.7.2`
/// name the same archive and cache entry.
fn bare_version(version: &str) -> &str {
    version.strip_prefix('v').unwrap_or(version)
}

/// Symlink-aware existence check; a dangling symlink counts as present.
fn path_exists(path: &Path) -> Result<bool> {
    match std::fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Append `suffix` to the file name; `Path::with_extension` would eat the
/// patch number of `kubeone-1.7.0`.
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn write_file(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    use std::io::Write;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(mode)
        .open(path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    Ok(())
}

fn extract_entry(zip_path: &Path, entry: &str, target: &Path) -> Result<()> {
    let file = std::fs::File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| E2eError::Archive(format!("opening {}: {}", zip_path.display(), e)))?;

    let mut packed = match archive.by_name(entry) {
        Ok(f) => f,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(E2eError::Archive(format!(
                "entry {:?} not found in {}",
                entry,
                zip_path.display()
            )))
        }
        Err(e) => return Err(e.into()),
    };

    let partial = with_suffix(target, ".partial");
    {
        let mut out = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(0o750)
            .open(&partial)?;
        std::io::copy(&mut packed, &mut out)?;
        out.sync_all()?;
    }
    std::fs::rename(&partial, target)?;
    Ok(())
}
