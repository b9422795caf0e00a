//! Experiment Spec - one cell of the experiment matrix plus its timing

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default node memory ceiling for starting a run, in percent.
pub const DEFAULT_MAX_NODE_MEMORY_PERCENT: u32 = 85;

const fn default_max_node_memory() -> u32 {
    DEFAULT_MAX_NODE_MEMORY_PERCENT
}

/// Immutable description of one capture: which workload, how many replicas,
/// and how long each phase lasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentSpec {
    workload: String,
    replicas: u32,
    stabilization: Duration,
    recording: Duration,
    cleanup_delay: Duration,
    step: Duration,
    scrape_lag: Duration,
    ready_timeout: Duration,
    progress_interval: Duration,
    #[serde(default = "default_max_node_memory")]
    max_node_memory_percent: u32,
}

impl ExperimentSpec {
    /// Create a builder with the default phase durations
    /// (5 min stabilization, 60 min recording at 5 s resolution).
    #[must_use]
    pub fn builder(workload: impl Into<String>, replicas: u32) -> ExperimentSpecBuilder {
        ExperimentSpecBuilder::new(workload, replicas)
    }

    /// Get the workload identifier.
    #[must_use]
    pub fn workload(&self) -> &str {
        &self.workload
    }

    /// Get the replica count.
    #[must_use]
    pub const fn replicas(&self) -> u32 {
        self.replicas
    }

    /// Get the stabilization wait.
    #[must_use]
    pub const fn stabilization(&self) -> Duration {
        self.stabilization
    }

    /// Get the recording window length.
    #[must_use]
    pub const fn recording(&self) -> Duration {
        self.recording
    }

    /// Get the wait after scaling to zero.
    #[must_use]
    pub const fn cleanup_delay(&self) -> Duration {
        self.cleanup_delay
    }

    /// Get the range-query step.
    #[must_use]
    pub const fn step(&self) -> Duration {
        self.step
    }

    /// Get the wait between window close and the first query.
    #[must_use]
    pub const fn scrape_lag(&self) -> Duration {
        self.scrape_lag
    }

    /// Get the bound on waiting for ready pods.
    #[must_use]
    pub const fn ready_timeout(&self) -> Duration {
        self.ready_timeout
    }

    /// Get the progress log interval.
    #[must_use]
    pub const fn progress_interval(&self) -> Duration {
        self.progress_interval
    }

    /// Node memory use (percent) above which a run refuses to start.
    #[must_use]
    pub const fn max_node_memory_percent(&self) -> u32 {
        self.max_node_memory_percent
    }

    /// Grid points per series: `recording / step + 1` (both bounds inclusive).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn sample_count(&self) -> usize {
        (self.recording.as_millis() / self.step.as_millis()) as usize + 1
    }
}

/// Builder for `ExperimentSpec`.
#[derive(Debug)]
pub struct ExperimentSpecBuilder {
    spec: ExperimentSpec,
}

impl ExperimentSpecBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(workload: impl Into<String>, replicas: u32) -> Self {
        Self {
            spec: ExperimentSpec {
                workload: workload.into(),
                replicas,
                stabilization: Duration::from_secs(300),
                recording: Duration::from_secs(3_600),
                cleanup_delay: Duration::from_secs(30),
                step: Duration::from_secs(5),
                scrape_lag: Duration::from_secs(30),
                ready_timeout: Duration::from_secs(300),
                progress_interval: Duration::from_secs(300),
                max_node_memory_percent: DEFAULT_MAX_NODE_MEMORY_PERCENT,
            },
        }
    }

    /// Set the stabilization wait.
    #[must_use]
    pub const fn stabilization(mut self, d: Duration) -> Self {
        self.spec.stabilization = d;
        self
    }

    /// Set the recording window length.
    #[must_use]
    pub const fn recording(mut self, d: Duration) -> Self {
        self.spec.recording = d;
        self
    }

    /// Set the cleanup delay.
    #[must_use]
    pub const fn cleanup_delay(mut self, d: Duration) -> Self {
        self.spec.cleanup_delay = d;
        self
    }

    /// Set the range-query step.
    #[must_use]
    pub const fn step(mut self, d: Duration) -> Self {
        self.spec.step = d;
        self
    }

    /// Set the scrape lag wait.
    #[must_use]
    pub const fn scrape_lag(mut self, d: Duration) -> Self {
        self.spec.scrape_lag = d;
        self
    }

    /// Set the ready timeout.
    #[must_use]
    pub const fn ready_timeout(mut self, d: Duration) -> Self {
        self.spec.ready_timeout = d;
        self
    }

    /// Set the progress log interval.
    #[must_use]
    pub const fn progress_interval(mut self, d: Duration) -> Self {
        self.spec.progress_interval = d;
        self
    }

    /// Set the node memory ceiling in percent.
    #[must_use]
    pub const fn max_node_memory_percent(mut self, percent: u32) -> Self {
        self.spec.max_node_memory_percent = percent;
        self
    }

    /// Build the `ExperimentSpec`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if replicas is zero, the step is zero or
    /// sub-second, the recording window is not a whole number of steps, the
    /// progress interval is zero, or the node memory limit is outside 1..=100.
    pub fn build(self) -> Result<ExperimentSpec> {
        let spec = self.spec;
        if spec.workload.is_empty() {
            return Err(Error::Config("workload must not be empty".to_string()));
        }
        if spec.replicas == 0 {
            return Err(Error::Config("replicas must be >= 1".to_string()));
        }
        if spec.step.as_millis() == 0 || spec.step.subsec_millis() != 0 {
            return Err(Error::Config(format!(
                "step must be a whole number of seconds, got {:?}",
                spec.step
            )));
        }
        if spec.recording.is_zero() || spec.recording.as_millis() % spec.step.as_millis() != 0 {
            return Err(Error::Config(format!(
                "recording {:?} must be a positive multiple of step {:?}",
                spec.recording, spec.step
            )));
        }
        if spec.progress_interval.is_zero() {
            return Err(Error::Config("progress interval must be > 0".to_string()));
        }
        if spec.max_node_memory_percent == 0 || spec.max_node_memory_percent > 100 {
            return Err(Error::Config(format!(
                "node memory limit must be within 1..=100 percent, got {}",
                spec.max_node_memory_percent
            )));
        }
        Ok(spec)
    }
}
