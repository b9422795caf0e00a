//! Sample Aligner
//!
//! Normalizes one range-query result onto the run's shared grid
//! (`start + k * step`, both bounds inclusive). The aligner never invents
//! data:
//!
//! - grid points without a sample stay absent (`None`), never interpolated
//! - label-sets beyond the metric's expected cardinality are kept apart and
//!   flagged, never summed or averaged
//! - samples outside the window or off the grid are dropped and counted
//!
//! Every label-set of every metric therefore has exactly `window.len()` rows,
//! which is the temporal alignment invariant the dataset relies on.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::MetricDefinition;
use crate::query::{Labels, QueryWindow, RawSeries};

/// Non-fatal finding recorded next to the data it concerns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataQualityWarning {
    /// More label-sets than the metric's cardinality allows.
    UnexpectedSeries {
        /// Maximum expected.
        expected: usize,
        /// Returned by the backend.
        found: usize,
    },
    /// Grid points with no sample.
    Gaps {
        /// Series index.
        series: usize,
        /// Absent grid points.
        missing: usize,
    },
    /// Samples outside `[start, end]` or between grid points.
    OutOfWindow {
        /// Series index.
        series: usize,
        /// Samples dropped.
        dropped: usize,
    },
    /// More than one sample for the same grid point (first kept).
    DuplicateSamples {
        /// Series index.
        series: usize,
        /// Extra samples dropped.
        duplicates: usize,
    },
    /// NaN or infinite values stored as absent.
    NonFinite {
        /// Series index.
        series: usize,
        /// Values affected.
        count: usize,
    },
}

impl fmt::Display for DataQualityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedSeries { expected, found } => {
                write!(f, "{found} label-sets returned, at most {expected} expected")
            }
            Self::Gaps { series, missing } => {
                write!(f, "series {series}: {missing} grid points without data")
            }
            Self::OutOfWindow { series, dropped } => {
                write!(f, "series {series}: {dropped} samples outside the grid dropped")
            }
            Self::DuplicateSamples { series, duplicates } => {
                write!(f, "series {series}: {duplicates} duplicate samples dropped")
            }
            Self::NonFinite { series, count } => {
                write!(f, "series {series}: {count} non-finite values stored as absent")
            }
        }
    }
}

/// One label-set on the grid.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedLabelSet {
    /// Identifying labels.
    pub labels: Labels,
    /// One slot per grid point; `None` marks absent data.
    pub values: Vec<Option<f64>>,
}

impl AlignedLabelSet {
    /// Grid points with data.
    #[must_use]
    pub fn present(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }
}

/// One row of an aligned series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignedRow {
    /// Grid timestamp.
    pub timestamp: DateTime<Utc>,
    /// Value, or `None` for an absent marker.
    pub value: Option<f64>,
    /// Index into [`AlignedSeries::label_sets`].
    pub series: usize,
}

/// A metric's samples for one run, aligned to the run's window.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedSeries {
    key: String,
    window: QueryWindow,
    label_sets: Vec<AlignedLabelSet>,
    warnings: Vec<DataQualityWarning>,
}

impl AlignedSeries {
    /// Metric key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Shared window.
    #[must_use]
    pub const fn window(&self) -> &QueryWindow {
        &self.window
    }

    /// Label-sets in canonical (label-sorted) order.
    #[must_use]
    pub fn label_sets(&self) -> &[AlignedLabelSet] {
        &self.label_sets
    }

    /// Data quality findings.
    #[must_use]
    pub fn warnings(&self) -> &[DataQualityWarning] {
        &self.warnings
    }

    /// Whether the backend returned nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.label_sets.is_empty()
    }

    /// Total rows: grid points times label-sets.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.label_sets.len() * self.window.len()
    }

    /// Rows grouped by label-set, each group in timestamp order.
    pub fn rows(&self) -> impl Iterator<Item = AlignedRow> + '_ {
        self.label_sets.iter().enumerate().flat_map(move |(series, set)| {
            self.window
                .grid()
                .zip(set.values.iter())
                .map(move |(timestamp, value)| AlignedRow {
                    timestamp,
                    value: *value,
                    series,
                })
        })
    }
}

/// Aligns raw results onto one run's grid.
#[derive(Debug, Clone, Copy)]
pub struct SampleAligner {
    window: QueryWindow,
    replicas: u32,
}

impl SampleAligner {
    /// Create an aligner for a run's window and replica count.
    #[must_use]
    pub const fn new(window: QueryWindow, replicas: u32) -> Self {
        Self { window, replicas }
    }

    /// Align one metric's raw result.
    #[must_use]
    pub fn align(&self, metric: &MetricDefinition, raw: Vec<RawSeries>) -> AlignedSeries {
        let mut raw = raw;
        raw.sort_by(|a, b| a.labels.cmp(&b.labels));

        let mut warnings = Vec::new();
        let expected = metric.cardinality().max_series(self.replicas);
        if raw.len() > expected {
            tracing::warn!(
                metric = metric.key(),
                expected,
                found = raw.len(),
                "more label-sets than expected, keeping them separate"
            );
            warnings.push(DataQualityWarning::UnexpectedSeries {
                expected,
                found: raw.len(),
            });
        }

        let grid_len = self.window.len();
        let label_sets = raw
            .into_iter()
            .enumerate()
            .map(|(series, s)| {
                let mut values = vec![None; grid_len];
                let mut filled = vec![false; grid_len];
                let (mut dropped, mut duplicates, mut non_finite) = (0, 0, 0);

                for sample in s.samples {
                    let Some(idx) = self.window.grid_index(sample.timestamp) else {
                        dropped += 1;
                        continue;
                    };
                    if filled[idx] {
                        duplicates += 1;
                        continue;
                    }
                    filled[idx] = true;
                    if sample.value.is_finite() {
                        values[idx] = Some(sample.value);
                    } else {
                        non_finite += 1;
                    }
                }

                let missing = filled.iter().filter(|f| !**f).count();
                if missing > 0 {
                    warnings.push(DataQualityWarning::Gaps { series, missing });
                }
                if dropped > 0 {
                    warnings.push(DataQualityWarning::OutOfWindow { series, dropped });
                }
                if duplicates > 0 {
                    warnings.push(DataQualityWarning::DuplicateSamples { series, duplicates });
                }
                if non_finite > 0 {
                    warnings.push(DataQualityWarning::NonFinite {
                        series,
                        count: non_finite,
                    });
                }

                AlignedLabelSet {
                    labels: s.labels,
                    values,
                }
            })
            .collect::<Vec<_>>();

        if label_sets.is_empty() {
            tracing::info!(metric = metric.key(), "empty result, recording zero-row series");
        }

        AlignedSeries {
            key: metric.key().to_string(),
            window: self.window,
            label_sets,
            warnings,
        }
    }
}
