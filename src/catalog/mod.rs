//! Metric Catalog - declarative table of range queries
//!
//! Every metric captured for a run is described by one [`MetricDefinition`]:
//! a key, a query template parameterized only by the workload identifier,
//! the label domain it is attributable at, and the number of label-sets
//! the backend is expected to return.
//!
//! ## Label Domains
//!
//! ```text
//! container  per-pod cAdvisor series, filtered to the workload's own container
//! device     accelerator series (no pod label, attributed by temporal exclusivity)
//! node       pressure/stall indicators (exclusivity, optionally container-refined)
//! workload   application series whose metric name embeds the workload
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use trueno_capture::catalog::MetricCatalog;
//!
//! let catalog = MetricCatalog::standard();
//! catalog.validate()?;
//!
//! let cpu = catalog.get("cpu_usage").unwrap();
//! assert!(cpu.render("resnet50").contains(r#"container="resnet50""#));
//! # Ok::<(), trueno_capture::Error>(())
//! ```

mod standard;

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Placeholder substituted with the workload identifier.
pub const WORKLOAD_PLACEHOLDER: &str = "{workload}";

/// Container filter every container-scoped template must carry.
const CONTAINER_FILTER: &str = r#"container="{workload}""#;

/// Granularity at which a metric can be attributed to a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelDomain {
    /// Per-container series (cAdvisor).
    Container,
    /// Per-device series (DCGM exporter).
    Device,
    /// Node-level pressure/stall series.
    Node,
    /// Application-instrumented series named after the workload.
    Workload,
}

impl LabelDomain {
    /// Whether attribution relies on only one workload being active.
    #[must_use]
    pub const fn requires_exclusivity(self) -> bool {
        matches!(self, Self::Device | Self::Node)
    }
}

impl fmt::Display for LabelDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Container => "container",
            Self::Device => "device",
            Self::Node => "node",
            Self::Workload => "workload",
        };
        f.write_str(name)
    }
}

/// How many label-sets a query is expected to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// At most one label-set.
    #[default]
    Single,
    /// At most one label-set per replica (one per pod).
    PerReplica,
}

impl Cardinality {
    /// Maximum number of label-sets expected for `replicas` pods.
    #[must_use]
    pub const fn max_series(self, replicas: u32) -> usize {
        match self {
            Self::Single => 1,
            Self::PerReplica => replicas as usize,
        }
    }
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDefinition {
    key: String,
    query: String,
    domain: LabelDomain,
    unit: String,
    #[serde(default)]
    cardinality: Cardinality,
}

impl MetricDefinition {
    /// Create a new metric definition.
    ///
    /// # Arguments
    ///
    /// * `key` - Metric key (e.g., "cpu_usage"), used in artifact names
    /// * `query` - Query template; `{workload}` is the only placeholder
    /// * `domain` - Label domain the series is attributable at
    /// * `unit` - Unit of the sample values
    /// * `cardinality` - Expected number of label-sets
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        query: impl Into<String>,
        domain: LabelDomain,
        unit: impl Into<String>,
        cardinality: Cardinality,
    ) -> Self {
        Self {
            key: key.into(),
            query: query.into(),
            domain,
            unit: unit.into(),
            cardinality,
        }
    }

    /// Get the metric key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the label domain.
    #[must_use]
    pub const fn domain(&self) -> LabelDomain {
        self.domain
    }

    /// Get the unit.
    #[must_use]
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Get the expected cardinality.
    #[must_use]
    pub const fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// Render the query for a workload.
    #[must_use]
    pub fn render(&self, workload: &str) -> String {
        self.query.replace(WORKLOAD_PLACEHOLDER, workload)
    }

    /// Validate this definition in isolation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Catalog`] describing the first defect found.
    pub fn validate(&self) -> Result<()> {
        let key = &self.key;
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(Error::Catalog(format!(
                "metric key '{key}' must be non-empty and match [a-z0-9_]+"
            )));
        }
        if self.query.trim().is_empty() {
            return Err(Error::Catalog(format!("metric '{key}' has an empty query")));
        }

        check_placeholders(key, &self.query)?;

        match self.domain {
            LabelDomain::Container if !self.query.contains(CONTAINER_FILTER) => {
                Err(Error::Catalog(format!(
                    "container-scoped metric '{key}' must filter on {CONTAINER_FILTER}; \
                     a pod-name match alone also selects the pod's infrastructure container"
                )))
            }
            LabelDomain::Workload if !self.query.contains(WORKLOAD_PLACEHOLDER) => {
                Err(Error::Catalog(format!(
                    "workload-scoped metric '{key}' must reference {WORKLOAD_PLACEHOLDER}"
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Verify braces: PromQL selector braces must balance, and the only
/// template placeholder allowed is `{workload}`.
fn check_placeholders(key: &str, query: &str) -> Result<()> {
    let stripped = query.replace(WORKLOAD_PLACEHOLDER, "");
    let mut depth = 0i32;
    for (i, c) in stripped.char_indices() {
        match c {
            '{' => {
                depth += 1;
                let rest = &stripped[i + 1..];
                let close = rest.find('}').unwrap_or(rest.len());
                let inner = rest[..close].trim();
                // `{name}` with an identifier and no operator is an unknown
                // placeholder; `{5}` is a regex quantifier
                if inner.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
                    && inner.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    return Err(Error::Catalog(format!(
                        "metric '{key}' uses unknown placeholder '{{{inner}}}'"
                    )));
                }
            }
            '}' => {
                depth -= 1;
                if depth < 0 {
                    break;
                }
            }
            _ => {}
        }
    }
    if depth == 0 {
        Ok(())
    } else {
        Err(Error::Catalog(format!(
            "metric '{key}' has unbalanced braces in its query"
        )))
    }
}

/// Read-only, ordered set of metric definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricCatalog {
    metrics: Vec<MetricDefinition>,
}

impl MetricCatalog {
    /// Build a catalog from explicit definitions.
    #[must_use]
    pub const fn new(metrics: Vec<MetricDefinition>) -> Self {
        Self { metrics }
    }

    /// The standard inference-experiment catalog (15 metrics).
    #[must_use]
    pub fn standard() -> Self {
        Self::new(standard::definitions())
    }

    /// Number of metrics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Look up a definition by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&MetricDefinition> {
        self.metrics.iter().find(|m| m.key() == key)
    }

    /// Iterate in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &MetricDefinition> {
        self.metrics.iter()
    }

    /// Keys in declaration order.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        self.metrics.iter().map(MetricDefinition::key).collect()
    }

    /// Validate every definition and reject duplicate keys.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Catalog`] on the first defect found.
    pub fn validate(&self) -> Result<()> {
        if self.metrics.is_empty() {
            return Err(Error::Catalog("catalog has no metrics".to_string()));
        }
        let mut seen = HashSet::new();
        for metric in &self.metrics {
            metric.validate()?;
            if !seen.insert(metric.key()) {
                return Err(Error::Catalog(format!(
                    "duplicate metric key '{}'",
                    metric.key()
                )));
            }
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a MetricCatalog {
    type Item = &'a MetricDefinition;
    type IntoIter = std::slice::Iter<'a, MetricDefinition>;

    fn into_iter(self) -> Self::IntoIter {
        self.metrics.iter()
    }
}
