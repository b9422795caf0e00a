//! Matrix Tracker
//!
//! Derives completed and pending experiment matrix cells from the output
//! directory alone. There is no state file: the artifacts on disk are the
//! only durable bookkeeping, so scanning is idempotent and deleting a
//! capture's files moves its cell back to pending.
//!
//! A cell is completed when at least one capture stamp has:
//! 1. a manifest with status `exported`
//! 2. the shared timestamps artifact
//! 3. an artifact for every catalog key
//!
//! Every capture found is listed under its cell, complete or not.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::catalog::MetricCatalog;
use crate::dataset::{self, cell_dir_name, parse_artifact, ArtifactKind};
use crate::experiment::RunStatus;
use crate::{Error, Result};

/// The experiment matrix: workloads x replica counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matrix {
    workloads: Vec<String>,
    replicas: Vec<u32>,
}

impl Matrix {
    /// Create a matrix.
    #[must_use]
    pub const fn new(workloads: Vec<String>, replicas: Vec<u32>) -> Self {
        Self {
            workloads,
            replicas,
        }
    }

    /// Workload identifiers.
    #[must_use]
    pub fn workloads(&self) -> &[String] {
        &self.workloads
    }

    /// Replica counts.
    #[must_use]
    pub fn replicas(&self) -> &[u32] {
        &self.replicas
    }

    /// Number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workloads.len() * self.replicas.len()
    }

    /// Whether the matrix has no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cells in workload-major order.
    pub fn cells(&self) -> impl Iterator<Item = (&str, u32)> + '_ {
        self.workloads
            .iter()
            .flat_map(move |w| self.replicas.iter().map(move |r| (w.as_str(), *r)))
    }
}

/// One capture (one start stamp) found in a cell directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureSummary {
    /// `YYYYmmdd_HHMMSS` naming stamp.
    pub stamp: String,
    /// Start time decoded from the stamp.
    pub started_at: Option<DateTime<Utc>>,
    /// Catalog metrics with an artifact.
    pub metrics_present: usize,
    /// Catalog metrics without an artifact.
    pub metrics_missing: Vec<String>,
    /// Whether the timestamps artifact exists.
    pub has_timestamps: bool,
    /// Manifest status, `None` if absent or unreadable.
    pub manifest_status: Option<RunStatus>,
    /// Whether this capture satisfies the completion rule.
    pub complete: bool,
}

/// Tracker view of one matrix cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatrixEntry {
    /// Workload identifier.
    pub workload: String,
    /// Replica count.
    pub replicas: u32,
    /// Whether any capture is complete.
    pub completed: bool,
    /// Captures in stamp order.
    pub captures: Vec<CaptureSummary>,
}

impl MatrixEntry {
    /// Captures that are not complete.
    pub fn partial_captures(&self) -> impl Iterator<Item = &CaptureSummary> {
        self.captures.iter().filter(|c| !c.complete)
    }
}

/// Completed and pending cells.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatrixReport {
    entries: Vec<MatrixEntry>,
}

impl MatrixReport {
    /// Every cell in matrix order.
    #[must_use]
    pub fn entries(&self) -> &[MatrixEntry] {
        &self.entries
    }

    /// Completed cells.
    pub fn completed(&self) -> impl Iterator<Item = &MatrixEntry> {
        self.entries.iter().filter(|e| e.completed)
    }

    /// Pending cells.
    pub fn pending(&self) -> impl Iterator<Item = &MatrixEntry> {
        self.entries.iter().filter(|e| !e.completed)
    }

    /// Look up one cell.
    #[must_use]
    pub fn entry(&self, workload: &str, replicas: u32) -> Option<&MatrixEntry> {
        self.entries
            .iter()
            .find(|e| e.workload == workload && e.replicas == replicas)
    }

    /// Whether (`workload`, `replicas`) is completed.
    #[must_use]
    pub fn is_completed(&self, workload: &str, replicas: u32) -> bool {
        self.entry(workload, replicas).is_some_and(|e| e.completed)
    }
}

/// Scan `output_dir` against `matrix`. Read-only.
///
/// # Errors
///
/// Returns error if a cell directory exists but cannot be listed.
pub fn scan(matrix: &Matrix, catalog: &MetricCatalog, output_dir: &Path) -> Result<MatrixReport> {
    let entries = matrix
        .cells()
        .map(|(workload, replicas)| scan_cell(workload, replicas, catalog, output_dir))
        .collect::<Result<Vec<_>>>()?;
    Ok(MatrixReport { entries })
}

#[derive(Default)]
struct StampFiles {
    metrics: BTreeSet<String>,
    timestamps: bool,
    manifest: Option<String>,
}

/// Scan a single cell.
///
/// # Errors
///
/// Returns error if the cell directory exists but cannot be listed.
pub fn scan_cell(
    workload: &str,
    replicas: u32,
    catalog: &MetricCatalog,
    output_dir: &Path,
) -> Result<MatrixEntry> {
    let dir = output_dir.join(cell_dir_name(workload, replicas));
    let listing = match fs::read_dir(&dir) {
        Ok(listing) => listing,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Ok(MatrixEntry {
                workload: workload.to_string(),
                replicas,
                completed: false,
                captures: Vec::new(),
            });
        }
        Err(e) => {
            return Err(Error::StorageError(format!(
                "cannot list {}: {e}",
                dir.display()
            )))
        }
    };

    let mut stamps: BTreeMap<String, StampFiles> = BTreeMap::new();
    for item in listing {
        let item = item?;
        let Ok(name) = item.file_name().into_string() else {
            continue;
        };
        let Some(parsed) = parse_artifact(workload, replicas, &name) else {
            continue;
        };
        let files = stamps.entry(parsed.stamp).or_default();
        match parsed.kind {
            ArtifactKind::Metric(key) => {
                files.metrics.insert(key);
            }
            ArtifactKind::Timestamps => files.timestamps = true,
            ArtifactKind::Manifest => files.manifest = Some(name),
        }
    }

    let captures: Vec<CaptureSummary> = stamps
        .into_iter()
        .map(|(stamp, files)| {
            let manifest_status = files.manifest.as_ref().and_then(|name| {
                match dataset::read_manifest(dir.join(name)) {
                    Ok(manifest) => Some(manifest.status),
                    Err(e) => {
                        tracing::warn!(file = %name, error = %e, "unreadable manifest");
                        None
                    }
                }
            });
            let metrics_missing: Vec<String> = catalog
                .iter()
                .map(|m| m.key())
                .filter(|k| !files.metrics.contains(*k))
                .map(ToString::to_string)
                .collect();
            let metrics_present = catalog.len() - metrics_missing.len();
            let complete = manifest_status == Some(RunStatus::Exported)
                && files.timestamps
                && metrics_missing.is_empty();
            CaptureSummary {
                started_at: dataset::parse_stamp(&stamp),
                stamp,
                metrics_present,
                metrics_missing,
                has_timestamps: files.timestamps,
                manifest_status,
                complete,
            }
        })
        .collect();

    Ok(MatrixEntry {
        workload: workload.to_string(),
        replicas,
        completed: captures.iter().any(|c| c.complete),
        captures,
    })
}
