//! Error types for Trueno-Capture
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)
//!
//! Errors fall into four classes that drive the propagation policy:
//! - transient transport failures (retried, then isolated per metric)
//! - configuration defects (fatal, will recur on every run)
//! - control-plane failures (fatal for the current run)
//! - precondition violations (fail fast before anything is touched)

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Trueno-Capture error types
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level failure talking to the metrics backend (retryable)
    #[error("Transport error: {0}")]
    Transport(String),

    /// HTTP client error (boxed to keep enum small)
    #[error("HTTP error: {0}")]
    Http(#[source] Box<reqwest::Error>),

    /// Backend rejected the query itself (catalog defect, fatal)
    #[error("Invalid query for metric '{key}': {message}\nFix the query template in the metric catalog.")]
    InvalidQuery {
        /// Metric key whose template was rejected
        key: String,
        /// Backend error message
        message: String,
    },

    /// Retries exhausted for one metric
    #[error("Query for metric '{key}' failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Metric key
        key: String,
        /// Attempts made
        attempts: u32,
        /// Last error observed
        last: String,
    },

    /// Backend health probe failed
    #[error("Metrics backend unhealthy at {url}: {reason}")]
    BackendUnhealthy {
        /// Backend base URL
        url: String,
        /// Why the probe failed
        reason: String,
    },

    /// Response body did not match the range-query contract
    #[error("Malformed backend response: {0}")]
    MalformedResponse(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metric catalog failed validation
    #[error("Metric catalog error: {0}")]
    Catalog(String),

    /// Workload identifier not declared in the configuration
    #[error("Unknown workload '{name}'\nAvailable: {available}")]
    UnknownWorkload {
        /// Requested workload
        name: String,
        /// Comma separated list of declared workloads
        available: String,
    },

    /// Replica count not part of the experiment matrix
    #[error("Invalid replica count {replicas}\nMatrix replica counts: {available}")]
    InvalidReplicas {
        /// Requested replica count
        replicas: u32,
        /// Comma separated list of matrix replica counts
        available: String,
    },

    /// Scale or pod listing call failed
    #[error("Control plane error: {0}")]
    ControlPlane(String),

    /// Workload did not reach the requested ready replica count in time
    #[error("Timed out after {waited_secs}s waiting for {workload}: {ready}/{wanted} replicas ready")]
    ReadyTimeout {
        /// Workload being scaled
        workload: String,
        /// Ready replicas at timeout
        ready: u32,
        /// Requested replicas
        wanted: u32,
        /// Seconds waited
        waited_secs: u64,
    },

    /// Another workload's pods are active (temporal exclusivity violated)
    #[error("Other workload pods are active: {}\nDevice and node metrics cannot be attributed. Scale them to zero first.", .active.join(", "))]
    ExclusivityViolation {
        /// Active pods as `workload/pod`
        active: Vec<String>,
    },

    /// A node is too close to its memory limit to start a clean run
    #[error("Node memory too high: {} (limit {limit}%)\nPressure metrics would be contaminated. Free memory first.", .nodes.join(", "))]
    NodeMemoryPressure {
        /// Offending nodes as `node at N%`
        nodes: Vec<String>,
        /// Configured limit in percent
        limit: u32,
    },

    /// The (workload, replicas) pair already has a complete capture
    #[error("{workload} x {replicas} already captured (use --force to capture again)")]
    AlreadyCaptured {
        /// Workload
        workload: String,
        /// Replica count
        replicas: u32,
    },

    /// Experiment state machine received an illegal transition
    #[error("Invalid run transition: {from} -> {to}")]
    InvalidTransition {
        /// Current phase
        from: String,
        /// Requested phase
        to: String,
    },

    /// Run interrupted by the operator
    #[error("Run cancelled during {0}")]
    Cancelled(String),

    /// Storage error (Parquet/Arrow/layout)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML config parse error
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(Box::new(err))
    }
}

impl Error {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Http(_))
    }

    /// Whether the error is a defect that aborts the whole run.
    ///
    /// Per-metric failures (exhausted retries, storage hiccups) are not fatal:
    /// the remaining metrics keep exporting.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidQuery { .. }
                | Self::Config(_)
                | Self::Catalog(_)
                | Self::UnknownWorkload { .. }
                | Self::ControlPlane(_)
                | Self::ReadyTimeout { .. }
        )
    }
}
