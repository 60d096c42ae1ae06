//! Presubmit matrix: many test cases fanned out into Prow jobs.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::job::{new_prow_job, pull_prow_job_name, ProwConfig, ProwJob};

/// Repository the presubmits are registered for.
pub const DEFAULT_REPOSITORY: &str = "kubermatic/kubeone";

/// One test case to fan out into a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEntry {
    /// Parts of the job name, joined after the `pull-kubeone-e2e-` prefix.
    pub name: Vec<String>,

    /// Go test title passed to `-run`.
    pub title: String,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub settings: ProwConfig,
}

impl JobEntry {
    pub fn new(name: &[&str], title: impl Into<String>) -> Self {
        Self {
            name: name.iter().map(|s| s.to_string()).collect(),
            title: title.into(),
            labels: BTreeMap::new(),
            settings: ProwConfig::default(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_settings(mut self, settings: ProwConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn to_job(&self) -> ProwJob {
        new_prow_job(
            pull_prow_job_name(&self.name),
            self.labels.clone(),
            &self.title,
            self.settings,
        )
    }
}

#[derive(Serialize)]
struct PresubmitsDocument<'a> {
    presubmits: BTreeMap<&'a str, Vec<ProwJob>>,
}

/// Ordered collection of job entries for one repository.
#[derive(Debug, Clone)]
pub struct JobMatrix {
    repository: String,
    entries: Vec<JobEntry>,
}

impl Default for JobMatrix {
    fn default() -> Self {
        Self::new(DEFAULT_REPOSITORY)
    }
}

impl JobMatrix {
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            entries: Vec::new(),
        }
    }

    /// Load entries from a YAML (or JSON) list.
    pub fn from_yaml(repository: impl Into<String>, source: &str) -> Result<Self> {
        let entries: Vec<JobEntry> =
            serde_yaml::from_str(source).context("Failed to parse job matrix entries")?;
        let mut matrix = Self::new(repository);
        for entry in entries {
            matrix.push(entry)?;
        }
        Ok(matrix)
    }

    pub fn from_file(repository: impl Into<String>, path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(repository, &source)
    }

    /// Add an entry. Job names must be unique within the matrix.
    pub fn push(&mut self, entry: JobEntry) -> Result<()> {
        if entry.name.is_empty() {
            anyhow::bail!("job entry for {} has no name parts", entry.title);
        }
        if entry.title.is_empty() {
            anyhow::bail!("job entry {:?} has no test title", entry.name);
        }

        let name = pull_prow_job_name(&entry.name);
        if self.entries.iter().any(|e| pull_prow_job_name(&e.name) == name) {
            anyhow::bail!("duplicate job name: {}", name);
        }

        debug!(job = %name, title = %entry.title, "Adding job to matrix");
        self.entries.push(entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Jobs in insertion order.
    pub fn jobs(&self) -> Vec<ProwJob> {
        self.entries.iter().map(JobEntry::to_job).collect()
    }

    /// `{"presubmits": {"<repository>": [jobs...]}}` as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        let document = PresubmitsDocument {
            presubmits: BTreeMap::from([(self.repository.as_str(), self.jobs())]),
        };
        serde_json::to_string_pretty(&document).context("Failed to serialize job matrix")
    }
}
