//! Prow job descriptors for e2e test cases.

use k8s_openapi::api::core::v1::{Container, PodSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Image every e2e job runs in.
pub const PROW_IMAGE: &str = "kubermatic/kubeone-e2e:v0.1.22";

/// Repository cloned by every e2e job.
pub const CLONE_URI: &str = "ssh://git@github.com/kubermatic/kubeone.git";

/// Prefix of presubmit job names.
pub const PULL_JOB_PREFIX: &str = "pull-kubeone-e2e-";

/// Go package holding the e2e tests.
pub const TEST_PACKAGE: &str = "./testv2/e2e/...";

/// Run policy of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProwConfig {
    /// Run on every pull request.
    pub always_run: bool,

    /// Failure does not block merging.
    pub optional: bool,
}

impl ProwConfig {
    pub fn new(always_run: bool, optional: bool) -> Self {
        Self { always_run, optional }
    }
}

/// One CI job definition as consumed by Prow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProwJob {
    pub name: String,
    pub always_run: bool,
    pub optional: bool,
    pub decorate: bool,
    pub clone_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_alias: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    pub spec: PodSpec,
}

/// Build the job running the single test `test_title`.
pub fn new_prow_job(
    name: impl Into<String>,
    labels: BTreeMap<String, String>,
    test_title: &str,
    settings: ProwConfig,
) -> ProwJob {
    let run = format!("^{}$", test_title);
    let command = ["go", "test", "-v", TEST_PACKAGE, "-tags", "e2e", "-run", run.as_str()]
        .iter()
        .map(|s| s.to_string())
        .collect();

    ProwJob {
        name: name.into(),
        always_run: settings.always_run,
        optional: settings.optional,
        decorate: true,
        clone_uri: CLONE_URI.to_string(),
        path_alias: None,
        labels,
        spec: PodSpec {
            containers: vec![Container {
                image: Some(PROW_IMAGE.to_string()),
                image_pull_policy: Some("Always".to_string()),
                command: Some(command),
                resources: Some(ResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "cpu".to_string(),
                        Quantity("1".to_string()),
                    )])),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        },
    }
}

/// `pull-kubeone-e2e-` followed by `parts` joined with `-`, underscores
/// replaced by dashes.
pub fn pull_prow_job_name<S: AsRef<str>>(parts: &[S]) -> String {
    let joined = parts.iter().map(AsRef::as_ref).collect::<Vec<_>>().join("-");
    format!("{}{}", PULL_JOB_PREFIX, joined.replace('_', "-"))
}

/// Turn an identifier such as `install_containerd` or `upgrade_1.27_1.28`
/// into a Go test title (`InstallContainerd`, `Upgrade1_271_28`).
pub fn titleize(s: &str) -> String {
    s.replace('_', " ")
        .replace('.', "_")
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect()
}
