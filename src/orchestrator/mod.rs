//! Experiment Orchestrator
//!
//! Drives one [`ExperimentRun`] through its state machine:
//!
//! ```text
//! Init ─> Scaling ─> Stabilizing ─> Recording ─> Exporting ─> CleaningUp ─> Done
//!  │         │            │             │            │             │
//!  └─ Err    └────────────┴─────────────┴────────────┴─> CleaningUp └─> Failed
//! ```
//!
//! - Init preconditions fail fast with `Err` and touch neither the cluster
//!   nor the output directory.
//! - Once scaling starts, every exit path goes through `CleaningUp`, so the
//!   workload is always scaled back to zero.
//! - A failed metric is recorded and the export continues; only a fatal
//!   error (a rejected query) aborts it.
//! - Cancellation marks the run failed, still cleans up, and writes no
//!   manifest.

mod control;
mod kubectl;

pub use control::{ActivePod, NodeMemory, WorkloadControl};
pub use kubectl::KubectlControl;

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{sleep, Instant};

use crate::align::SampleAligner;
use crate::catalog::{MetricCatalog, MetricDefinition};
use crate::dataset::{CaptureKey, DatasetWriter, Manifest, MANIFEST_VERSION};
use crate::experiment::{ExperimentRun, ExperimentSpec, MetricOutcome, Phase, RunReport, RunStatus};
use crate::query::{MetricsBackend, QueryWindow, RangeQueryClient};
use crate::tracker::{self, Matrix};
use crate::{Error, Result};

/// Interval between readiness polls.
pub const READY_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Runs captures against one metrics backend and one control plane.
#[derive(Debug)]
pub struct Orchestrator<B, C> {
    client: RangeQueryClient<B>,
    control: C,
    catalog: MetricCatalog,
    matrix: Matrix,
    writer: DatasetWriter,
    ready_poll: Duration,
}

impl<B: MetricsBackend, C: WorkloadControl> Orchestrator<B, C> {
    /// Create an orchestrator writing under `output_dir`.
    #[must_use]
    pub fn new(
        client: RangeQueryClient<B>,
        control: C,
        catalog: MetricCatalog,
        matrix: Matrix,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            control,
            catalog,
            matrix,
            writer: DatasetWriter::new(output_dir),
            ready_poll: READY_POLL_INTERVAL,
        }
    }

    /// Override the readiness poll interval.
    #[must_use]
    pub const fn with_ready_poll(mut self, interval: Duration) -> Self {
        self.ready_poll = interval;
        self
    }

    /// Dataset writer in use.
    #[must_use]
    pub const fn writer(&self) -> &DatasetWriter {
        &self.writer
    }

    /// Execute one capture.
    ///
    /// `shutdown` resolving cancels the run (e.g., on SIGINT). `force`
    /// captures a cell again even if the tracker reports it completed.
    ///
    /// # Errors
    ///
    /// Returns error only for Init precondition failures, before anything
    /// is touched. Every later failure is reported in the [`RunReport`]
    /// with status `Failed`.
    #[tracing::instrument(
        skip_all,
        fields(workload = spec.workload(), replicas = spec.replicas())
    )]
    pub async fn run<F>(&self, spec: ExperimentSpec, force: bool, shutdown: F) -> Result<RunReport>
    where
        F: Future<Output = ()>,
    {
        let mut run = ExperimentRun::new(spec);
        self.check_preconditions(run.spec(), force).await?;

        let mut outcomes = Vec::with_capacity(self.catalog.len());
        tokio::pin!(shutdown);
        let captured = {
            let capture = self.capture(&mut run, &mut outcomes);
            tokio::select! {
                biased;
                result = capture => Some(result),
                () = &mut shutdown => None,
            }
        };

        let (mut failure, cancelled) = match captured {
            Some(Ok(())) => (None, false),
            Some(Err(e)) => {
                tracing::error!(phase = %run.phase(), error = %e, "run failed");
                (Some(e.to_string()), false)
            }
            None => {
                let e = Error::Cancelled(run.phase().to_string());
                tracing::warn!(phase = %run.phase(), "run cancelled, cleaning up");
                (Some(e.to_string()), true)
            }
        };

        let failed_metrics = outcomes.iter().filter(|o| !o.is_exported()).count();
        if failure.is_none() && failed_metrics > 0 {
            failure = Some(format!(
                "{failed_metrics} of {} metrics failed",
                self.catalog.len()
            ));
        }
        let exported = failure.is_none() && outcomes.len() == self.catalog.len();

        let mut manifest = None;
        if !cancelled && run.phase() == Phase::Exporting {
            match self.write_manifest(&run, &outcomes, exported, failure.as_deref()) {
                Ok(path) => manifest = Some(path),
                Err(e) => {
                    tracing::error!(error = %e, "manifest not written");
                    failure.get_or_insert_with(|| e.to_string());
                }
            }
        }
        let exported = exported && manifest.is_some();

        // Nothing was scaled if the run never left Init
        let cleanup_error = if run.phase() == Phase::Init {
            None
        } else {
            run.advance(Phase::CleaningUp)?;
            self.cleanup(run.spec()).await
        };
        run.advance(if exported { Phase::Done } else { Phase::Failed })?;

        tracing::info!(
            status = %run.status(),
            exported = outcomes.iter().filter(|o| o.is_exported()).count(),
            failed = failed_metrics,
            "run finished"
        );

        Ok(RunReport {
            run,
            outcomes,
            failure,
            manifest,
            cleanup_error,
        })
    }

    async fn check_preconditions(&self, spec: &ExperimentSpec, force: bool) -> Result<()> {
        let workload = spec.workload();
        if !self.matrix.workloads().iter().any(|w| w == workload) {
            return Err(Error::UnknownWorkload {
                name: workload.to_string(),
                available: self.matrix.workloads().join(", "),
            });
        }
        self.catalog.validate()?;

        if !force {
            let entry =
                tracker::scan_cell(workload, spec.replicas(), &self.catalog, self.writer.root())?;
            if entry.completed {
                return Err(Error::AlreadyCaptured {
                    workload: workload.to_string(),
                    replicas: spec.replicas(),
                });
            }
        }

        self.client.health().await?;

        let others: Vec<String> = self
            .control
            .active_pods()
            .await?
            .into_iter()
            .filter(|p| p.workload != workload)
            .map(|p| p.to_string())
            .collect();
        if !others.is_empty() {
            return Err(Error::ExclusivityViolation { active: others });
        }

        self.check_node_memory(spec.max_node_memory_percent()).await?;

        tracing::info!("preconditions passed");
        Ok(())
    }

    /// Refuse to start on a node already near its memory limit. A missing
    /// metrics API skips the check.
    async fn check_node_memory(&self, limit: u32) -> Result<()> {
        let nodes = match self.control.node_memory().await {
            Ok(nodes) => nodes,
            Err(e) => {
                tracing::warn!(error = %e, "node memory unavailable, skipping headroom check");
                return Ok(());
            }
        };
        for node in &nodes {
            tracing::debug!(node = %node.node, percent = node.percent, "node memory");
        }
        let over: Vec<String> = nodes
            .iter()
            .filter(|n| n.percent > limit)
            .map(ToString::to_string)
            .collect();
        if over.is_empty() {
            Ok(())
        } else {
            Err(Error::NodeMemoryPressure { nodes: over, limit })
        }
    }

    async fn capture(
        &self,
        run: &mut ExperimentRun,
        outcomes: &mut Vec<MetricOutcome>,
    ) -> Result<()> {
        let spec = run.spec().clone();
        let workload = spec.workload();

        run.advance(Phase::Scaling)?;
        tracing::info!(phase = %run.phase(), "scaling workload");
        self.control.scale(workload, spec.replicas()).await?;
        self.wait_ready(&spec).await?;

        run.advance(Phase::Stabilizing)?;
        wait_with_progress(Phase::Stabilizing, spec.stabilization(), spec.progress_interval())
            .await;

        run.advance(Phase::Recording)?;
        let window = *run.open_window(Utc::now())?;
        tracing::info!(
            start = %window.start(),
            end = %window.end(),
            samples = window.len(),
            "recording window open"
        );
        wait_with_progress(Phase::Recording, spec.recording(), spec.progress_interval()).await;
        if !spec.scrape_lag().is_zero() {
            tracing::info!(secs = spec.scrape_lag().as_secs(), "waiting for final scrape");
            sleep(spec.scrape_lag()).await;
        }

        run.advance(Phase::Exporting)?;
        let key = CaptureKey::new(workload, spec.replicas(), window.start());
        self.writer.write_timestamps(&key, &window)?;
        self.export(&spec, &window, &key, outcomes).await
    }

    async fn wait_ready(&self, spec: &ExperimentSpec) -> Result<()> {
        let started = Instant::now();
        let deadline = started + spec.ready_timeout();
        loop {
            let ready = self.control.ready_replicas(spec.workload()).await?;
            tracing::info!(ready, wanted = spec.replicas(), "waiting for replicas");
            if ready >= spec.replicas() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::ReadyTimeout {
                    workload: spec.workload().to_string(),
                    ready,
                    wanted: spec.replicas(),
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            sleep(self.ready_poll).await;
        }
    }

    async fn export(
        &self,
        spec: &ExperimentSpec,
        window: &QueryWindow,
        key: &CaptureKey,
        outcomes: &mut Vec<MetricOutcome>,
    ) -> Result<()> {
        let aligner = SampleAligner::new(*window, spec.replicas());
        for metric in &self.catalog {
            match self.export_metric(metric, spec, window, &aligner, key).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    tracing::warn!(metric = metric.key(), error = %e, "metric not exported");
                    outcomes.push(MetricOutcome::Failed {
                        key: metric.key().to_string(),
                        domain: metric.domain(),
                        reason: e.to_string(),
                    });
                    if e.is_fatal() {
                        return Err(e);
                    }
                }
            }
        }
        Ok(())
    }

    async fn export_metric(
        &self,
        metric: &MetricDefinition,
        spec: &ExperimentSpec,
        window: &QueryWindow,
        aligner: &SampleAligner,
        key: &CaptureKey,
    ) -> Result<MetricOutcome> {
        let raw = self.client.query(metric, spec.workload(), window).await?;
        let aligned = aligner.align(metric, raw);
        for warning in aligned.warnings() {
            tracing::warn!(metric = metric.key(), %warning, "data quality");
        }
        let path = self.writer.write_series(key, &aligned)?;
        let artifact = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        tracing::info!(metric = metric.key(), rows = aligned.row_count(), "exported");

        Ok(MetricOutcome::Exported {
            key: metric.key().to_string(),
            domain: metric.domain(),
            artifact,
            series: aligned.label_sets().len(),
            rows: aligned.row_count(),
            warnings: aligned.warnings().to_vec(),
        })
    }

    fn write_manifest(
        &self,
        run: &ExperimentRun,
        outcomes: &[MetricOutcome],
        exported: bool,
        failure: Option<&str>,
    ) -> Result<PathBuf> {
        let window = run.window().ok_or_else(|| {
            Error::InvalidTransition {
                from: run.phase().to_string(),
                to: "manifest".to_string(),
            }
        })?;
        let spec = run.spec();
        let key = CaptureKey::new(spec.workload(), spec.replicas(), window.start());
        let manifest = Manifest {
            version: MANIFEST_VERSION,
            workload: spec.workload().to_string(),
            replicas: spec.replicas(),
            started_at: window.start(),
            ended_at: window.end(),
            step_ms: window.step_ms(),
            sample_count: window.len(),
            status: if exported {
                RunStatus::Exported
            } else {
                RunStatus::Failed
            },
            metrics: outcomes.to_vec(),
            failure: failure.map(ToString::to_string),
            phases: run.history().to_vec(),
            written_at: Utc::now(),
        };
        self.writer.write_manifest(&key, &manifest)
    }

    async fn cleanup(&self, spec: &ExperimentSpec) -> Option<String> {
        tracing::info!(phase = %Phase::CleaningUp, "scaling workload to zero");
        let error = match self.control.scale(spec.workload(), 0).await {
            Ok(()) => None,
            Err(e) => {
                tracing::error!(error = %e, "scale-down failed, workload may still be running");
                Some(e.to_string())
            }
        };
        if !spec.cleanup_delay().is_zero() {
            sleep(spec.cleanup_delay()).await;
        }
        error
    }
}

async fn wait_with_progress(phase: Phase, total: Duration, interval: Duration) {
    let interval = if interval.is_zero() { total } else { interval };
    let mut elapsed = Duration::ZERO;
    while elapsed < total {
        let remaining = total - elapsed;
        #[allow(clippy::cast_precision_loss)]
        let progress = elapsed.as_secs_f64() / total.as_secs_f64() * 100.0;
        tracing::info!(
            phase = %phase,
            elapsed_secs = elapsed.as_secs(),
            remaining_secs = remaining.as_secs(),
            progress = %format!("{progress:.1}%"),
            "waiting"
        );
        let chunk = interval.min(remaining);
        sleep(chunk).await;
        elapsed += chunk;
    }
}
