//! Deterministic artifact naming
//!
//! ```text
//! <out>/<workload>_r<N>/<workload>_r<N>_<metric>_<YYYYmmdd_HHMMSS>.parquet
//! <out>/<workload>_r<N>/<workload>_r<N>_<YYYYmmdd_HHMMSS>_timestamps.parquet
//! <out>/<workload>_r<N>/<workload>_r<N>_<YYYYmmdd_HHMMSS>_manifest.json
//! ```
//!
//! Names are a pure function of (workload, replicas, metric key, start time),
//! so two runs of the same cell never collide and a partial run is
//! identifiable by its stamp.

use chrono::{DateTime, NaiveDateTime, Utc};

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const STAMP_LEN: usize = 15;
const PARQUET_EXT: &str = ".parquet";
const TIMESTAMPS_SUFFIX: &str = "_timestamps.parquet";
const MANIFEST_SUFFIX: &str = "_manifest.json";

/// Naming key of one capture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CaptureKey {
    workload: String,
    replicas: u32,
    started_at: DateTime<Utc>,
}

impl CaptureKey {
    /// Create a key. Sub-second precision is not part of the name.
    #[must_use]
    pub fn new(workload: impl Into<String>, replicas: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            workload: workload.into(),
            replicas,
            started_at,
        }
    }

    /// Workload identifier.
    #[must_use]
    pub fn workload(&self) -> &str {
        &self.workload
    }

    /// Replica count.
    #[must_use]
    pub const fn replicas(&self) -> u32 {
        self.replicas
    }

    /// Capture start time.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// `YYYYmmdd_HHMMSS` of the start time.
    #[must_use]
    pub fn stamp(&self) -> String {
        self.started_at.format(STAMP_FORMAT).to_string()
    }

    /// Directory holding every capture of this cell.
    #[must_use]
    pub fn dir_name(&self) -> String {
        cell_dir_name(&self.workload, self.replicas)
    }

    /// Artifact file name for one metric.
    #[must_use]
    pub fn metric_file(&self, metric: &str) -> String {
        format!(
            "{}{metric}_{}{PARQUET_EXT}",
            cell_prefix(&self.workload, self.replicas),
            self.stamp()
        )
    }

    /// Shared timestamps artifact file name.
    #[must_use]
    pub fn timestamps_file(&self) -> String {
        format!(
            "{}{}{TIMESTAMPS_SUFFIX}",
            cell_prefix(&self.workload, self.replicas),
            self.stamp()
        )
    }

    /// Manifest file name (written last).
    #[must_use]
    pub fn manifest_file(&self) -> String {
        format!(
            "{}{}{MANIFEST_SUFFIX}",
            cell_prefix(&self.workload, self.replicas),
            self.stamp()
        )
    }
}

/// Directory name of a matrix cell.
#[must_use]
pub fn cell_dir_name(workload: &str, replicas: u32) -> String {
    format!("{workload}_r{replicas}")
}

fn cell_prefix(workload: &str, replicas: u32) -> String {
    format!("{workload}_r{replicas}_")
}

/// What a file in a cell directory is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Per-metric dataset.
    Metric(String),
    /// Shared timestamps dataset.
    Timestamps,
    /// Run manifest.
    Manifest,
}

/// A recognized artifact file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArtifact {
    /// Stamp of the capture it belongs to.
    pub stamp: String,
    /// Artifact kind.
    pub kind: ArtifactKind,
}

/// Parse a file name found in the directory of (`workload`, `replicas`).
///
/// Returns `None` for hidden/temporary files and anything not produced by
/// the writer.
#[must_use]
pub fn parse_artifact(workload: &str, replicas: u32, file_name: &str) -> Option<ParsedArtifact> {
    if file_name.starts_with('.') {
        return None;
    }
    let rest = file_name.strip_prefix(&cell_prefix(workload, replicas))?;

    if let Some(stamp) = rest.strip_suffix(MANIFEST_SUFFIX) {
        return valid_stamp(stamp).then(|| ParsedArtifact {
            stamp: stamp.to_string(),
            kind: ArtifactKind::Manifest,
        });
    }
    if let Some(stamp) = rest.strip_suffix(TIMESTAMPS_SUFFIX) {
        if valid_stamp(stamp) {
            return Some(ParsedArtifact {
                stamp: stamp.to_string(),
                kind: ArtifactKind::Timestamps,
            });
        }
    }

    let stem = rest.strip_suffix(PARQUET_EXT)?;
    let split = stem.len().checked_sub(STAMP_LEN + 1)?;
    if !stem.is_char_boundary(split) {
        return None;
    }
    let (metric, tail) = stem.split_at(split);
    let stamp = tail.strip_prefix('_')?;
    (!metric.is_empty() && valid_stamp(stamp)).then(|| ParsedArtifact {
        stamp: stamp.to_string(),
        kind: ArtifactKind::Metric(metric.to_string()),
    })
}

/// Parse a stamp back into a UTC time.
#[must_use]
pub fn parse_stamp(stamp: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

fn valid_stamp(stamp: &str) -> bool {
    stamp.len() == STAMP_LEN && parse_stamp(stamp).is_some()
}
