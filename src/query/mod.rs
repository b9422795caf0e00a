//! Range Query Client
//!
//! Executes one time-windowed query per catalog entry against a metrics
//! backend, with bounded exponential-backoff retry for transport failures.
//!
//! The backend is a trait so the orchestrator can be driven by an
//! in-memory implementation; [`PrometheusBackend`] speaks the
//! Prometheus `query_range` HTTP API.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use chrono::{TimeDelta, Utc};
//! use trueno_capture::catalog::MetricCatalog;
//! use trueno_capture::query::{PrometheusBackend, QueryWindow, RangeQueryClient, RetryPolicy};
//!
//! # async fn example() -> trueno_capture::Result<()> {
//! let backend = PrometheusBackend::new("http://localhost:9090", Duration::from_secs(60))?;
//! let client = RangeQueryClient::new(backend, RetryPolicy::default());
//!
//! let end = Utc::now();
//! let window = QueryWindow::new(end - TimeDelta::minutes(10), end, TimeDelta::seconds(5))?;
//! let catalog = MetricCatalog::standard();
//! let series = client.query(catalog.get("gpu_power").unwrap(), "resnet50", &window).await?;
//! println!("{} label-sets", series.len());
//! # Ok(())
//! # }
//! ```

mod prometheus;

pub use prometheus::PrometheusBackend;

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::MetricDefinition;
use crate::{Error, Result};

/// Label-set identifying one returned series (ordered for canonical output).
pub type Labels = BTreeMap<String, String>;

/// `[start, end]` at a fixed step; both bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    step_ms: i64,
}

impl QueryWindow {
    /// Create a window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `end <= start`, `step <= 0`, or the step
    /// does not divide the window evenly.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, step: TimeDelta) -> Result<Self> {
        if end <= start {
            return Err(Error::Config(format!(
                "query window end {end} must be after start {start}"
            )));
        }
        let step_ms = step.num_milliseconds();
        if step_ms <= 0 {
            return Err(Error::Config("query step must be positive".to_string()));
        }
        let span_ms = (end - start).num_milliseconds();
        if span_ms % step_ms != 0 {
            return Err(Error::Config(format!(
                "query window of {span_ms}ms is not a multiple of the {step_ms}ms step"
            )));
        }
        Ok(Self {
            start,
            end,
            step_ms,
        })
    }

    /// Window start.
    #[must_use]
    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Window end.
    #[must_use]
    pub const fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Step between grid points.
    #[must_use]
    pub fn step(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.step_ms)
    }

    /// Step in milliseconds.
    #[must_use]
    pub const fn step_ms(&self) -> i64 {
        self.step_ms
    }

    /// Number of grid points.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn len(&self) -> usize {
        ((self.end - self.start).num_milliseconds() / self.step_ms) as usize + 1
    }

    /// Always false: a valid window has at least two grid points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Whether `ts` lies within the bounds.
    #[must_use]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// Grid index of `ts`, if it falls exactly on the grid.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn grid_index(&self, ts: DateTime<Utc>) -> Option<usize> {
        if !self.contains(ts) {
            return None;
        }
        let offset = (ts - self.start).num_milliseconds();
        (offset % self.step_ms == 0).then(|| (offset / self.step_ms) as usize)
    }

    /// Grid timestamps from start to end.
    pub fn grid(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        (0..self.len()).map(move |i| {
            #[allow(clippy::cast_possible_wrap)]
            let offset = self.step_ms * i as i64;
            self.start + TimeDelta::milliseconds(offset)
        })
    }
}

/// One raw sample as returned by the backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Sample timestamp.
    pub timestamp: DateTime<Utc>,
    /// Sample value (may be non-finite).
    pub value: f64,
}

impl Sample {
    /// Create a sample.
    #[must_use]
    pub const fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// One label-set and its samples.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawSeries {
    /// Identifying labels.
    pub labels: Labels,
    /// Samples, ascending by timestamp after client post-processing.
    pub samples: Vec<Sample>,
}

impl RawSeries {
    /// Create a series.
    #[must_use]
    pub const fn new(labels: Labels, samples: Vec<Sample>) -> Self {
        Self { labels, samples }
    }
}

/// Metrics time-series backend.
///
/// Implementations report transient failures as retryable errors
/// ([`Error::is_retryable`]) and rejected queries as [`Error::InvalidQuery`].
pub trait MetricsBackend: Send + Sync {
    /// Run a range query for an already-rendered query string.
    fn range_query(
        &self,
        query: &str,
        window: &QueryWindow,
    ) -> impl Future<Output = Result<Vec<RawSeries>>> + Send;

    /// Probe backend health.
    fn health(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Cap on any single delay.
    pub max_backoff: Duration,
    /// Growth factor between delays.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Catalog-aware query client with retry.
#[derive(Debug, Clone)]
pub struct RangeQueryClient<B> {
    backend: B,
    retry: RetryPolicy,
}

impl<B: MetricsBackend> RangeQueryClient<B> {
    /// Create a client.
    #[must_use]
    pub const fn new(backend: B, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    /// Borrow the backend.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Probe backend health.
    ///
    /// # Errors
    ///
    /// Propagates the backend's health error.
    pub async fn health(&self) -> Result<()> {
        self.backend.health().await
    }

    /// Query one metric for `workload` over `window`.
    ///
    /// Returned series have samples bounded to the window and sorted
    /// ascending. An empty vector means the backend matched nothing, which
    /// is not an error.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidQuery`] if the backend rejected the query (fatal)
    /// - [`Error::RetriesExhausted`] after `max_attempts` transient failures
    /// - any other non-retryable backend error, unchanged
    #[tracing::instrument(skip(self, metric, window), fields(metric = metric.key()), err)]
    pub async fn query(
        &self,
        metric: &MetricDefinition,
        workload: &str,
        window: &QueryWindow,
    ) -> Result<Vec<RawSeries>> {
        if workload.is_empty()
            || !workload
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::Config(format!(
                "workload identifier '{workload}' cannot be substituted into a query"
            )));
        }
        let query = metric.render(workload);
        let attempts = self.retry.max_attempts.max(1);

        let mut attempt = 1;
        let mut series = loop {
            match self.backend.range_query(&query, window).await {
                Ok(series) => break series,
                Err(Error::InvalidQuery { message, .. }) => {
                    return Err(Error::InvalidQuery {
                        key: metric.key().to_string(),
                        message,
                    });
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "range query failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    return Err(Error::RetriesExhausted {
                        key: metric.key().to_string(),
                        attempts,
                        last: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        };

        for s in &mut series {
            s.samples.retain(|sample| window.contains(sample.timestamp));
            s.samples.sort_by_key(|sample| sample.timestamp);
        }
        tracing::debug!(series = series.len(), "range query complete");
        Ok(series)
    }
}
