//! Error types for kubeone-e2e

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while driving and verifying a KubeOne cluster
#[derive(Error, Debug)]
pub enum E2eError {
    /// Harness misconfiguration (bad paths, empty commands, ...)
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Manifest template could not be parsed or rendered
    #[error("Template rendering failed: {0}")]
    Template(String),

    /// A version string did not parse as semver
    #[error("Invalid version {input:?}: {reason}")]
    InvalidVersion { input: String, reason: String },

    /// Container image reference without a single `:`-delimited tag
    #[error("Invalid container image format: {0}")]
    InvalidImage(String),

    /// Observed version differs from the target version
    #[error("{component} version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        component: String,
        expected: String,
        actual: String,
    },

    /// Polling horizon elapsed before the condition was met
    #[error("Timed out after {elapsed:?}: {message}")]
    Timeout { elapsed: Duration, message: String },

    /// External binary exited unsuccessfully
    #[error("Command `{command}` failed with exit code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    /// Lifecycle binary produced output we could not decode
    #[error("Malformed manifest output: {0}")]
    Manifest(String),

    /// `kubeone kubeconfig` succeeded but produced no credentials
    #[error("Cluster credentials unavailable: {0}")]
    Credentials(String),

    /// Release archive is not a zip or misses the expected entry
    #[error("Archive error: {0}")]
    Archive(String),

    /// Downloaded archive does not match its pinned digest
    #[error("Integrity check failed for {artifact}: expected {expected}, got {actual}")]
    Integrity {
        artifact: String,
        expected: String,
        actual: String,
    },

    /// Conformance run reported failed tests
    #[error("Some e2e tests failed:\n{0}")]
    ConformanceFailed(String),

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(String),

    /// HTTP error (release downloads)
    #[error("HTTP error: {0}")]
    Http(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl E2eError {
    /// Build an `InvalidVersion` error from any displayable parse failure.
    pub fn invalid_version(input: &str, reason: impl std::fmt::Display) -> Self {
        E2eError::InvalidVersion {
            input: input.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<reqwest::Error> for E2eError {
    fn from(err: reqwest::Error) -> Self {
        E2eError::Http(err.to_string())
    }
}

impl From<kube::Error> for E2eError {
    fn from(err: kube::Error) -> Self {
        E2eError::Kube(err.to_string())
    }
}

impl From<zip::result::ZipError> for E2eError {
    fn from(err: zip::result::ZipError) -> Self {
        E2eError::Archive(err.to_string())
    }
}

impl From<minijinja::Error> for E2eError {
    fn from(err: minijinja::Error) -> Self {
        E2eError::Template(err.to_string())
    }
}

impl From<serde_yaml::Error> for E2eError {
    fn from(err: serde_yaml::Error) -> Self {
        E2eError::Manifest(err.to_string())
    }
}
