//! Workload scaling control seam

use std::fmt;
use std::future::Future;

use crate::Result;

/// A running pod attributed to a known workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivePod {
    /// Workload identifier.
    pub workload: String,
    /// Pod name.
    pub pod: String,
}

impl fmt::Display for ActivePod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.workload, self.pod)
    }
}

/// Memory use of one cluster node as reported by the metrics API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMemory {
    /// Node name.
    pub node: String,
    /// Memory in use, percent of allocatable.
    pub percent: u32,
}

impl fmt::Display for NodeMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}%", self.node, self.percent)
    }
}

/// Control plane operations the orchestrator needs.
///
/// Failures are reported as [`crate::Error::ControlPlane`].
pub trait WorkloadControl: Send + Sync {
    /// Set the desired replica count of `workload`.
    fn scale(&self, workload: &str, replicas: u32) -> impl Future<Output = Result<()>> + Send;

    /// Pods of `workload` that are running with every container ready.
    fn ready_replicas(&self, workload: &str) -> impl Future<Output = Result<u32>> + Send;

    /// Non-terminated pods of every known workload.
    fn active_pods(&self) -> impl Future<Output = Result<Vec<ActivePod>>> + Send;

    /// Current memory use of every node.
    fn node_memory(&self) -> impl Future<Output = Result<Vec<NodeMemory>>> + Send;
}
