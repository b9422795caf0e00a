//! `kubectl`-backed [`WorkloadControl`]

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use tokio::process::Command;

use super::{ActivePod, NodeMemory, WorkloadControl};
use crate::config::WorkloadConfig;
use crate::{Error, Result};

/// Drives deployments through the `kubectl` CLI.
#[derive(Debug, Clone)]
pub struct KubectlControl {
    binary: String,
    workloads: Vec<WorkloadConfig>,
}

impl KubectlControl {
    /// Create a controller for the declared workloads.
    #[must_use]
    pub fn new(workloads: Vec<WorkloadConfig>) -> Self {
        Self {
            binary: "kubectl".to_string(),
            workloads,
        }
    }

    /// Use a different `kubectl` executable.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn workload(&self, name: &str) -> Result<&WorkloadConfig> {
        self.workloads
            .iter()
            .find(|w| w.name == name)
            .ok_or_else(|| Error::ControlPlane(format!("workload '{name}' is not declared")))
    }

    async fn kubectl(&self, args: &[&str]) -> Result<String> {
        tracing::debug!(cmd = %self.binary, args = ?args, "running");
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::ControlPlane(format!("cannot run {}: {e}", self.binary)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::ControlPlane(format!(
                "{} {} failed: {}",
                self.binary,
                args.join(" "),
                stderr.trim()
            )));
        }
        String::from_utf8(output.stdout)
            .map_err(|e| Error::ControlPlane(format!("non UTF-8 output from {}: {e}", self.binary)))
    }

    async fn pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>> {
        let out = self
            .kubectl(&["get", "pods", "-n", namespace, "-l", selector, "-o", "json"])
            .await?;
        parse_pod_list(&out)
    }
}

impl WorkloadControl for KubectlControl {
    #[tracing::instrument(skip(self), err)]
    async fn scale(&self, workload: &str, replicas: u32) -> Result<()> {
        let w = self.workload(workload)?;
        let deployment = format!("deployment/{}", w.deployment());
        let replicas = format!("--replicas={replicas}");
        self.kubectl(&["scale", "-n", &w.namespace, &deployment, &replicas])
            .await?;
        Ok(())
    }

    async fn ready_replicas(&self, workload: &str) -> Result<u32> {
        let w = self.workload(workload)?;
        let selector = format!("app={}", w.app_label());
        let pods = self.pods(&w.namespace, &selector).await?;
        let ready = pods.iter().filter(|p| p.is_ready()).count();
        Ok(u32::try_from(ready).unwrap_or(u32::MAX))
    }

    async fn active_pods(&self) -> Result<Vec<ActivePod>> {
        let mut by_namespace: BTreeMap<&str, Vec<&WorkloadConfig>> = BTreeMap::new();
        for w in &self.workloads {
            by_namespace.entry(w.namespace.as_str()).or_default().push(w);
        }

        let mut active = Vec::new();
        for (namespace, workloads) in by_namespace {
            let labels: BTreeSet<&str> = workloads.iter().map(|w| w.app_label()).collect();
            let selector = format!(
                "app in ({})",
                labels.iter().copied().collect::<Vec<_>>().join(",")
            );
            for pod in self.pods(namespace, &selector).await? {
                if pod.is_terminated() {
                    continue;
                }
                let app = pod.metadata.labels.get("app").map(String::as_str);
                if let Some(w) = workloads.iter().find(|w| Some(w.app_label()) == app) {
                    active.push(ActivePod {
                        workload: w.name.clone(),
                        pod: pod.metadata.name,
                    });
                }
            }
        }
        Ok(active)
    }

    async fn node_memory(&self) -> Result<Vec<NodeMemory>> {
        let out = self.kubectl(&["top", "node", "--no-headers"]).await?;
        parse_top_nodes(&out)
    }
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pod {
    metadata: PodMeta,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodMeta {
    name: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    deletion_timestamp: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodStatus {
    #[serde(default)]
    phase: String,
    #[serde(default)]
    container_statuses: Vec<ContainerStatus>,
}

#[derive(Debug, Deserialize)]
struct ContainerStatus {
    #[serde(default)]
    ready: bool,
}

impl Pod {
    fn is_terminated(&self) -> bool {
        matches!(self.status.phase.as_str(), "Succeeded" | "Failed")
    }

    fn is_ready(&self) -> bool {
        self.metadata.deletion_timestamp.is_none()
            && self.status.phase == "Running"
            && !self.status.container_statuses.is_empty()
            && self.status.container_statuses.iter().all(|c| c.ready)
    }
}

fn parse_pod_list(json: &str) -> Result<Vec<Pod>> {
    let list: PodList = serde_json::from_str(json)
        .map_err(|e| Error::ControlPlane(format!("unexpected pod list: {e}")))?;
    Ok(list.items)
}

/// Parse `kubectl top node --no-headers`:
/// `NAME CPU(cores) CPU% MEMORY(bytes) MEMORY%`.
fn parse_top_nodes(text: &str) -> Result<Vec<NodeMemory>> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            let percent = cols
                .get(4)
                .and_then(|c| c.strip_suffix('%'))
                .and_then(|c| c.parse::<u32>().ok())
                .ok_or_else(|| Error::ControlPlane(format!("unexpected top node line: {line}")))?;
            Ok(NodeMemory {
                node: cols[0].to_string(),
                percent,
            })
        })
        .collect()
}
