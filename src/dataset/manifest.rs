//! Run manifest - the terminal record of a capture

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::experiment::{MetricOutcome, PhaseChange, RunStatus};

/// Manifest format version.
pub const MANIFEST_VERSION: u32 = 1;

/// JSON record written after every other artifact of a run.
///
/// A capture counts as complete only if its manifest says `exported`
/// and every catalog metric has an artifact on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Format version.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Workload identifier.
    pub workload: String,
    /// Replica count.
    pub replicas: u32,
    /// Window start (naming key).
    pub started_at: DateTime<Utc>,
    /// Window end.
    pub ended_at: DateTime<Utc>,
    /// Grid step in milliseconds.
    pub step_ms: i64,
    /// Grid points per label-set.
    pub sample_count: usize,
    /// Final run status.
    pub status: RunStatus,
    /// Per-metric outcomes in catalog order.
    pub metrics: Vec<MetricOutcome>,
    /// Run-level failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Phase transitions up to export.
    #[serde(default)]
    pub phases: Vec<PhaseChange>,
    /// When the manifest was written.
    pub written_at: DateTime<Utc>,
}

const fn default_version() -> u32 {
    MANIFEST_VERSION
}

impl Manifest {
    /// Keys with an exported artifact.
    pub fn exported_keys(&self) -> impl Iterator<Item = &str> {
        self.metrics
            .iter()
            .filter(|m| m.is_exported())
            .map(MetricOutcome::key)
    }
}
