//! Configuration loaded from `capture.toml`.
//!
//! Every field has a default, so an absent file yields the standard
//! three-workload matrix against a local Prometheus.
//!
//! ```toml
//! [backend]
//! url = "http://prometheus:9090"
//!
//! [timing]
//! stabilization_secs = 300
//! recording_secs = 3600
//!
//! [matrix]
//! replicas = [1, 2, 3, 6, 8, 16]
//!
//! [[workloads]]
//! name = "resnet50"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::{MetricCatalog, MetricDefinition};
use crate::experiment::{ExperimentSpec, DEFAULT_MAX_NODE_MEMORY_PERCENT};
use crate::query::RetryPolicy;
use crate::tracker::Matrix;
use crate::{Error, Result};

/// Top-level capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaptureConfig {
    /// Metrics backend settings.
    #[serde(default)]
    pub backend: BackendSettings,
    /// Retry policy for range queries.
    #[serde(default)]
    pub retry: RetrySettings,
    /// Phase durations.
    #[serde(default)]
    pub timing: TimingSettings,
    /// Checks made before a run touches the cluster.
    #[serde(default)]
    pub preconditions: PreconditionSettings,
    /// Output layout.
    #[serde(default)]
    pub output: OutputSettings,
    /// Replica counts of the experiment matrix.
    #[serde(default)]
    pub matrix: MatrixSettings,
    /// Declared workloads.
    #[serde(default = "default_workloads")]
    pub workloads: Vec<WorkloadConfig>,
    /// Replaces the standard catalog when non-empty.
    #[serde(default)]
    pub metrics: Vec<MetricDefinition>,
}

/// Metrics backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Base URL of the Prometheus-compatible API.
    #[serde(default = "default_backend_url")]
    pub url: String,
    /// Per-request timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Retry policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts per query, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    /// Growth factor between delays.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

/// Phase durations (seconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    /// Fixed wait between scaling and recording.
    #[serde(default = "default_stabilization")]
    pub stabilization_secs: u64,
    /// Length of the recording window.
    #[serde(default = "default_recording")]
    pub recording_secs: u64,
    /// Wait after scaling to zero.
    #[serde(default = "default_cleanup_delay")]
    pub cleanup_delay_secs: u64,
    /// Range-query resolution.
    #[serde(default = "default_step")]
    pub step_secs: u64,
    /// Wait after the window closes before querying.
    #[serde(default = "default_scrape_lag")]
    pub scrape_lag_secs: u64,
    /// Bound on waiting for pods to become ready.
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,
    /// Interval between progress log lines during long waits.
    #[serde(default = "default_progress_interval")]
    pub progress_interval_secs: u64,
}

/// Pre-run checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreconditionSettings {
    /// Refuse to start when any node uses more memory than this (percent).
    #[serde(default = "default_max_node_memory")]
    pub max_node_memory_percent: u32,
}

/// Output layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    /// Collection phase directory.
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

/// Replica axis of the experiment matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixSettings {
    /// Replica counts captured for every workload.
    #[serde(default = "default_replicas")]
    pub replicas: Vec<u32>,
}

/// A workload that can be scaled and measured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Identifier substituted into query templates.
    pub name: String,
    /// Deployment to scale (default `<name>-inference`).
    #[serde(default)]
    pub deployment: Option<String>,
    /// Kubernetes namespace.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Value of the `app` pod label (default `<name>`).
    #[serde(default)]
    pub app_label: Option<String>,
}

impl WorkloadConfig {
    /// Create a workload with default deployment/label naming.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            deployment: None,
            namespace: default_namespace(),
            app_label: None,
        }
    }

    /// Deployment name.
    #[must_use]
    pub fn deployment(&self) -> String {
        self.deployment
            .clone()
            .unwrap_or_else(|| format!("{}-inference", self.name))
    }

    /// Pod `app` label.
    #[must_use]
    pub fn app_label(&self) -> &str {
        self.app_label.as_deref().unwrap_or(&self.name)
    }
}

fn default_backend_url() -> String {
    "http://localhost:9090".to_string()
}
const fn default_request_timeout() -> u64 {
    60
}
const fn default_max_attempts() -> u32 {
    4
}
const fn default_initial_backoff() -> u64 {
    1_000
}
const fn default_max_backoff() -> u64 {
    30_000
}
const fn default_multiplier() -> f64 {
    2.0
}
const fn default_stabilization() -> u64 {
    300
}
const fn default_recording() -> u64 {
    3_600
}
const fn default_cleanup_delay() -> u64 {
    30
}
const fn default_step() -> u64 {
    5
}
const fn default_scrape_lag() -> u64 {
    30
}
const fn default_ready_timeout() -> u64 {
    300
}
const fn default_progress_interval() -> u64 {
    300
}
const fn default_max_node_memory() -> u32 {
    DEFAULT_MAX_NODE_MEMORY_PERCENT
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("data/raw/phase1")
}
fn default_replicas() -> Vec<u32> {
    vec![1, 2, 3, 6, 8, 16]
}
fn default_namespace() -> String {
    "default".to_string()
}
fn default_workloads() -> Vec<WorkloadConfig> {
    ["resnet50", "distilbert", "whisper"]
        .into_iter()
        .map(WorkloadConfig::new)
        .collect()
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            multiplier: default_multiplier(),
        }
    }
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            stabilization_secs: default_stabilization(),
            recording_secs: default_recording(),
            cleanup_delay_secs: default_cleanup_delay(),
            step_secs: default_step(),
            scrape_lag_secs: default_scrape_lag(),
            ready_timeout_secs: default_ready_timeout(),
            progress_interval_secs: default_progress_interval(),
        }
    }
}

impl Default for PreconditionSettings {
    fn default() -> Self {
        Self {
            max_node_memory_percent: default_max_node_memory(),
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

impl Default for MatrixSettings {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: BackendSettings::default(),
            retry: RetrySettings::default(),
            timing: TimingSettings::default(),
            preconditions: PreconditionSettings::default(),
            output: OutputSettings::default(),
            matrix: MatrixSettings::default(),
            workloads: default_workloads(),
            metrics: Vec::new(),
        }
    }
}

impl CaptureConfig {
    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns error if the TOML is malformed or fails validation.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    /// Load configuration from a file, falling back to defaults when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be parsed.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            let config = Self::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] or [`Error::Catalog`] on the first violation.
    /// Every check `run` makes on the configuration is made here too.
    pub fn validate(&self) -> Result<()> {
        if self.workloads.is_empty() {
            return Err(Error::Config("no workloads declared".to_string()));
        }
        let mut names: Vec<&str> = self.workloads.iter().map(|w| w.name.as_str()).collect();
        names.sort_unstable();
        if names.windows(2).any(|w| w[0] == w[1]) {
            return Err(Error::Config("duplicate workload names".to_string()));
        }
        if let Some(bad) = self.workloads.iter().find(|w| {
            w.name.is_empty()
                || !w
                    .name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        }) {
            return Err(Error::Config(format!(
                "workload name '{}' must match [A-Za-z0-9_-]+",
                bad.name
            )));
        }
        if self.matrix.replicas.is_empty() || self.matrix.replicas.contains(&0) {
            return Err(Error::Config(
                "matrix replica counts must be non-empty and >= 1".to_string(),
            ));
        }
        if self.backend.request_timeout_secs == 0 {
            return Err(Error::Config(
                "backend.request_timeout_secs must be >= 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be >= 1".to_string()));
        }
        if self.retry.multiplier < 1.0 {
            return Err(Error::Config("retry.multiplier must be >= 1.0".to_string()));
        }
        let t = &self.timing;
        if t.step_secs == 0 || t.recording_secs == 0 || t.recording_secs % t.step_secs != 0 {
            return Err(Error::Config(format!(
                "timing.recording_secs ({}) must be a positive multiple of timing.step_secs ({})",
                t.recording_secs, t.step_secs
            )));
        }
        // Timing is shared by every cell
        self.experiment_spec(&self.workloads[0].name, self.matrix.replicas[0])?;
        self.catalog().validate()
    }

    /// The metric catalog in effect.
    #[must_use]
    pub fn catalog(&self) -> MetricCatalog {
        if self.metrics.is_empty() {
            MetricCatalog::standard()
        } else {
            MetricCatalog::new(self.metrics.clone())
        }
    }

    /// The experiment matrix (workloads x replica counts).
    #[must_use]
    pub fn matrix(&self) -> Matrix {
        Matrix::new(
            self.workloads.iter().map(|w| w.name.clone()).collect(),
            self.matrix.replicas.clone(),
        )
    }

    /// Look up a declared workload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownWorkload`] if the name is not declared.
    pub fn workload(&self, name: &str) -> Result<&WorkloadConfig> {
        self.workloads
            .iter()
            .find(|w| w.name == name)
            .ok_or_else(|| Error::UnknownWorkload {
                name: name.to_string(),
                available: self
                    .workloads
                    .iter()
                    .map(|w| w.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    /// Build the experiment spec for one matrix cell.
    ///
    /// # Errors
    ///
    /// Returns error if the workload is unknown or the replica count is not in the matrix.
    pub fn experiment_spec(&self, workload: &str, replicas: u32) -> Result<ExperimentSpec> {
        self.workload(workload)?;
        if !self.matrix.replicas.contains(&replicas) {
            return Err(Error::InvalidReplicas {
                replicas,
                available: self
                    .matrix
                    .replicas
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }
        let t = &self.timing;
        let spec = ExperimentSpec::builder(workload, replicas)
            .stabilization(Duration::from_secs(t.stabilization_secs))
            .recording(Duration::from_secs(t.recording_secs))
            .cleanup_delay(Duration::from_secs(t.cleanup_delay_secs))
            .step(Duration::from_secs(t.step_secs))
            .scrape_lag(Duration::from_secs(t.scrape_lag_secs))
            .ready_timeout(Duration::from_secs(t.ready_timeout_secs))
            .progress_interval(Duration::from_secs(t.progress_interval_secs))
            .max_node_memory_percent(self.preconditions.max_node_memory_percent)
            .build()?;
        Ok(spec)
    }

    /// Retry policy for the range query client.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            multiplier: self.retry.multiplier,
        }
    }

    /// Per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.request_timeout_secs)
    }
}
