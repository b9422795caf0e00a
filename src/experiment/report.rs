//! Run Report - per-metric outcomes of an export

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{ExperimentRun, RunStatus};
use crate::align::DataQualityWarning;
use crate::catalog::LabelDomain;

/// Result of exporting one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MetricOutcome {
    /// Artifact written.
    Exported {
        /// Metric key.
        key: String,
        /// Label domain.
        domain: LabelDomain,
        /// Artifact file name (relative to the capture directory).
        artifact: String,
        /// Number of label-sets.
        series: usize,
        /// Rows written (grid points x series).
        rows: usize,
        /// Non-fatal data quality findings.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<DataQualityWarning>,
    },
    /// No artifact written.
    Failed {
        /// Metric key.
        key: String,
        /// Label domain.
        domain: LabelDomain,
        /// Why it failed.
        reason: String,
    },
}

impl MetricOutcome {
    /// Metric key.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Exported { key, .. } | Self::Failed { key, .. } => key,
        }
    }

    /// Whether an artifact was written.
    #[must_use]
    pub const fn is_exported(&self) -> bool {
        matches!(self, Self::Exported { .. })
    }

    /// Data quality warnings (empty for failures).
    #[must_use]
    pub fn warnings(&self) -> &[DataQualityWarning] {
        match self {
            Self::Exported { warnings, .. } => warnings,
            Self::Failed { .. } => &[],
        }
    }
}

/// Everything the operator needs to know about a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Final run value.
    pub run: ExperimentRun,
    /// Per-metric outcomes in catalog order (may be shorter than the
    /// catalog if the export was aborted).
    pub outcomes: Vec<MetricOutcome>,
    /// Run-level failure (control plane, fatal query, cancellation).
    pub failure: Option<String>,
    /// Manifest path if one was written.
    pub manifest: Option<PathBuf>,
    /// Scale-down failure. Does not affect the capture status.
    pub cleanup_error: Option<String>,
}

impl RunReport {
    /// Whether the run reached `Done`.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.run.status() == RunStatus::Exported
    }

    /// Outcomes that produced artifacts.
    pub fn exported(&self) -> impl Iterator<Item = &MetricOutcome> {
        self.outcomes.iter().filter(|o| o.is_exported())
    }

    /// Outcomes that did not.
    pub fn failed(&self) -> impl Iterator<Item = &MetricOutcome> {
        self.outcomes.iter().filter(|o| !o.is_exported())
    }

    /// Total data quality warnings across metrics.
    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.outcomes.iter().map(|o| o.warnings().len()).sum()
    }
}
