//! In-memory fakes for the harness capabilities (testing only)
//!
//! Provides `ManualClock`, `FakeProcessRunner`, `FakeClusterApi`,
//! `FakeConnector` and `StaticArtifactSource`, which satisfy the trait
//! contracts without real time, binaries, clusters or network.

use std::collections::{BTreeMap, VecDeque};
use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Container, Node, NodeCondition, NodeStatus, NodeSystemInfo, Pod, PodSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::artifact::ArtifactSource;
use crate::clock::Clock;
use crate::cluster::{ClusterApi, ClusterConnector, LABEL_CONTROL_PLANE_NODE, NAMESPACE_SYSTEM};
use crate::error::E2eError;
use crate::process::{ProcessCommand, ProcessOutput, ProcessRunner};
use crate::Result;

// ---------------------------------------------------------------------------
// ManualClock
// ---------------------------------------------------------------------------

/// Clock whose `sleep` advances time instantly.
#[derive(Debug, Default)]
pub struct ManualClock {
    elapsed: Mutex<Duration>,
    sleeps: AtomicU32,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward without sleeping.
    pub fn advance(&self, by: Duration) {
        *self.elapsed.lock().unwrap() += by;
    }

    /// Number of `sleep` calls so far.
    pub fn sleep_count(&self) -> u32 {
        self.sleeps.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        self.advance(duration);
    }
}

// ---------------------------------------------------------------------------
// FakeProcessRunner
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Rule {
    args_prefix: Vec<String>,
    responses: VecDeque<ProcessOutput>,
}

/// Scripted process runner.
///
/// Each rule matches commands whose arguments start with a prefix. Queued
/// responses are returned in order; the last one repeats. Unmatched commands
/// exit with 127.
#[derive(Debug, Default)]
pub struct FakeProcessRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<ProcessCommand>>,
}

impl FakeProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `output` for commands whose args start with `args_prefix`.
    pub fn on(self, args_prefix: &[&str], output: ProcessOutput) -> Self {
        {
            let mut rules = self.rules.lock().unwrap();
            let prefix: Vec<String> = args_prefix.iter().map(|s| s.to_string()).collect();
            match rules.iter_mut().find(|r| r.args_prefix == prefix) {
                Some(rule) => rule.responses.push_back(output),
                None => rules.push(Rule {
                    args_prefix: prefix,
                    responses: VecDeque::from([output]),
                }),
            }
        }
        self
    }

    /// Every command executed so far, in order.
    pub fn calls(&self) -> Vec<ProcessCommand> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of executed commands whose args start with `args_prefix`.
    pub fn count(&self, args_prefix: &[&str]) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| starts_with(&c.args, args_prefix))
            .count()
    }
}

fn starts_with(args: &[String], prefix: &[impl AsRef<str>]) -> bool {
    args.len() >= prefix.len() && args.iter().zip(prefix).all(|(a, p)| a == p.as_ref())
}

/// Successful output with `stdout`.
pub fn ok_output(stdout: &str) -> ProcessOutput {
    ProcessOutput {
        exit_code: 0,
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
        duration_ms: 1,
    }
}

/// Failed output with `exit_code` and `stderr`.
pub fn failed_output(exit_code: i32, stderr: &str) -> ProcessOutput {
    ProcessOutput {
        exit_code,
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
        duration_ms: 1,
    }
}

#[async_trait]
impl ProcessRunner for FakeProcessRunner {
    async fn execute(&self, command: &ProcessCommand) -> Result<ProcessOutput> {
        self.calls.lock().unwrap().push(command.clone());

        let mut rules = self.rules.lock().unwrap();
        let rule = rules
            .iter_mut()
            .find(|r| starts_with(&command.args, &r.args_prefix[..]));

        Ok(match rule {
            Some(rule) if rule.responses.len() > 1 => rule.responses.pop_front().unwrap(),
            Some(rule) => rule.responses.front().cloned().unwrap(),
            None => failed_output(127, &format!("unexpected command: {}", command.display())),
        })
    }
}

// ---------------------------------------------------------------------------
// FakeClusterApi
// ---------------------------------------------------------------------------

/// Cluster whose node listing walks through a sequence of snapshots.
///
/// Each `list_nodes` call observes the next snapshot; the last one sticks.
#[derive(Debug, Default)]
pub struct FakeClusterApi {
    snapshots: Mutex<Vec<Vec<Node>>>,
    pods: Mutex<Vec<Pod>>,
    node_lists: AtomicU32,
    failures_left: AtomicU32,
}

impl FakeClusterApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single, stable node set.
    pub fn with_nodes(self, nodes: Vec<Node>) -> Self {
        *self.snapshots.lock().unwrap() = vec![nodes];
        self
    }

    /// Successive node sets returned by consecutive listings.
    pub fn with_node_snapshots(self, snapshots: Vec<Vec<Node>>) -> Self {
        *self.snapshots.lock().unwrap() = snapshots;
        self
    }

    pub fn with_pods(self, pods: Vec<Pod>) -> Self {
        *self.pods.lock().unwrap() = pods;
        self
    }

    /// Fail the first `n` list calls.
    pub fn failing_lists(self, n: u32) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    /// Number of `list_nodes` calls that reached a snapshot or failed.
    pub fn node_list_count(&self) -> u32 {
        self.node_lists.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> Result<()> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(E2eError::Kube("connection refused".to_string()));
        }
        Ok(())
    }
}

fn labels_match(labels: Option<&BTreeMap<String, String>>, selector: &str) -> bool {
    let empty = BTreeMap::new();
    let labels = labels.unwrap_or(&empty);
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.get(key).map(String::as_str) == Some(value),
            None => labels.contains_key(term),
        })
}

#[async_trait]
impl ClusterApi for FakeClusterApi {
    async fn list_nodes(&self, label_selector: Option<&str>) -> Result<Vec<Node>> {
        let call = self.node_lists.fetch_add(1, Ordering::SeqCst) as usize;
        self.take_failure()?;

        let snapshots = self.snapshots.lock().unwrap();
        let nodes = match snapshots.len() {
            0 => Vec::new(),
            n => snapshots[call.min(n - 1)].clone(),
        };

        Ok(match label_selector {
            Some(selector) => nodes
                .into_iter()
                .filter(|n| labels_match(n.metadata.labels.as_ref(), selector))
                .collect(),
            None => nodes,
        })
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        self.take_failure()?;
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
            .filter(|p| labels_match(p.metadata.labels.as_ref(), label_selector))
            .cloned()
            .collect())
    }
}

/// Connector handing out a shared fake cluster and recording kubeconfigs.
pub struct FakeConnector {
    cluster: Arc<FakeClusterApi>,
    kubeconfigs: Mutex<Vec<Vec<u8>>>,
}

impl FakeConnector {
    pub fn new(cluster: Arc<FakeClusterApi>) -> Self {
        Self {
            cluster,
            kubeconfigs: Mutex::new(Vec::new()),
        }
    }

    pub fn kubeconfigs(&self) -> Vec<Vec<u8>> {
        self.kubeconfigs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterConnector for FakeConnector {
    async fn connect(&self, kubeconfig: &[u8]) -> Result<Arc<dyn ClusterApi>> {
        self.kubeconfigs.lock().unwrap().push(kubeconfig.to_vec());
        Ok(self.cluster.clone())
    }
}

/// Worker node with a kubelet version and a Ready condition.
pub fn node(name: &str, kubelet_version: &str, ready: bool) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        status: Some(NodeStatus {
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            node_info: Some(NodeSystemInfo {
                kubelet_version: kubelet_version.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Node carrying the control-plane role label.
pub fn control_plane_node(name: &str, kubelet_version: &str, ready: bool) -> Node {
    let mut n = node(name, kubelet_version, ready);
    n.metadata.labels = Some(BTreeMap::from([(
        LABEL_CONTROL_PLANE_NODE.to_string(),
        String::new(),
    )]));
    n
}

/// kube-apiserver static pod in kube-system running `image`.
pub fn apiserver_pod(name: &str, image: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE_SYSTEM.to_string()),
            labels: Some(BTreeMap::from([(
                "component".to_string(),
                "kube-apiserver".to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "kube-apiserver".to_string(),
                image: Some(image.to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// StaticArtifactSource
// ---------------------------------------------------------------------------

/// Serves one fixed body (or error) and counts fetches.
#[derive(Debug)]
pub struct StaticArtifactSource {
    body: std::result::Result<Vec<u8>, String>,
    urls: Mutex<Vec<String>>,
}

impl StaticArtifactSource {
    /// Zip archive containing a single entry.
    pub fn with_entry(entry: &str, contents: &[u8]) -> Self {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file(entry, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(contents).unwrap();
        let cursor = writer.finish().unwrap();
        Self::raw(cursor.into_inner())
    }

    /// Arbitrary response body.
    pub fn raw(body: Vec<u8>) -> Self {
        Self {
            body: Ok(body),
            urls: Mutex::new(Vec::new()),
        }
    }

    /// Every fetch fails with an HTTP error.
    pub fn failing(message: &str) -> Self {
        Self {
            body: Err(message.to_string()),
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn body(&self) -> &[u8] {
        self.body.as_deref().unwrap_or_default()
    }

    pub fn fetch_count(&self) -> usize {
        self.urls.lock().unwrap().len()
    }

    pub fn requested_urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactSource for StaticArtifactSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.urls.lock().unwrap().push(url.to_string());
        self.body.clone().map_err(E2eError::Http)
    }
}
