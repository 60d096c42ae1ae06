//! Integration tests for presubmit matrix generation.

use kubeone_e2e_ci::{titleize, JobEntry, JobMatrix, ProwConfig};
use serde_json::Value;

fn matrix() -> JobMatrix {
    let mut matrix = JobMatrix::new("kubermatic/kubeone");
    for (provider, case) in [("aws", "install_containerd"), ("gce", "upgrade_1.27")] {
        let title = titleize(&format!("test_{}_{}", provider, case));
        matrix
            .push(
                JobEntry::new(&[provider, case], title)
                    .with_label(format!("preset-{}", provider), "true")
                    .with_settings(ProwConfig::new(provider == "aws", true)),
            )
            .expect("unique job");
    }
    matrix
}

/// Test: document is keyed by repository and carries every job
#[test]
fn test_presubmits_document() {
    let json = matrix().to_json().expect("serialize");
    let doc: Value = serde_json::from_str(&json).unwrap();

    let jobs = doc["presubmits"]["kubermatic/kubeone"].as_array().unwrap();
    assert_eq!(jobs.len(), 2);

    assert_eq!(jobs[0]["name"], "pull-kubeone-e2e-aws-install-containerd");
    assert_eq!(jobs[0]["always_run"], true);
    assert_eq!(jobs[0]["labels"]["preset-aws"], "true");
    assert_eq!(
        jobs[0]["spec"]["containers"][0]["command"].as_array().unwrap().last().unwrap(),
        "^TestAwsInstallContainerd$"
    );

    assert_eq!(jobs[1]["name"], "pull-kubeone-e2e-gce-upgrade-1.27");
    assert_eq!(jobs[1]["always_run"], false);
    assert_eq!(
        jobs[1]["spec"]["containers"][0]["command"].as_array().unwrap().last().unwrap(),
        "^TestGceUpgrade1_27$"
    );
}

/// Test: identical matrices serialize byte-identically
#[test]
fn test_document_is_deterministic() {
    assert_eq!(matrix().to_json().unwrap(), matrix().to_json().unwrap());
}

/// Test: entries loaded from disk
#[test]
fn test_matrix_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jobs.yaml");
    std::fs::write(
        &path,
        "- name: [openstack, default]\n  title: TestOpenstackDefault\n  settings:\n    optional: true\n",
    )
    .unwrap();

    let matrix = JobMatrix::from_file("kubermatic/kubeone", &path).unwrap();
    let jobs = matrix.jobs();
    assert_eq!(jobs.len(), 1);
    assert!(jobs[0].optional);

    assert!(JobMatrix::from_file("kubermatic/kubeone", &dir.path().join("missing.yaml")).is_err());
}
