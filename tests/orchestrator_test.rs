//! Orchestrator state machine tests
//!
//! Drives full captures against an in-memory metrics backend and control
//! plane. The tokio clock is paused, so hour-long recording windows
//! complete instantly.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use trueno_capture::catalog::MetricCatalog;
use trueno_capture::dataset::{read_manifest, read_series, read_timestamps, CaptureKey};
use trueno_capture::experiment::{ExperimentSpec, MetricOutcome, Phase, RunStatus};
use trueno_capture::orchestrator::{ActivePod, NodeMemory, Orchestrator, WorkloadControl};
use trueno_capture::query::{
    Labels, MetricsBackend, QueryWindow, RangeQueryClient, RawSeries, RetryPolicy, Sample,
};
use trueno_capture::tracker::{self, Matrix};
use trueno_capture::{Error, Result};

// =============================================================================
// Fakes
// =============================================================================

#[derive(Clone, Copy)]
enum Failure {
    Transport,
    InvalidQuery,
}

#[derive(Clone, Default)]
struct FakeBackend {
    unhealthy: bool,
    /// (query substring, failure)
    failures: Vec<(&'static str, Failure)>,
    /// (query substring, delay before answering)
    stall: Option<(&'static str, Duration)>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MetricsBackend for FakeBackend {
    async fn range_query(&self, query: &str, window: &QueryWindow) -> Result<Vec<RawSeries>> {
        self.calls.lock().unwrap().push(query.to_string());
        if let Some((q, delay)) = self.stall {
            if query.contains(q) {
                tokio::time::sleep(delay).await;
            }
        }
        if let Some((_, failure)) = self.failures.iter().find(|(q, _)| query.contains(q)) {
            return Err(match failure {
                Failure::Transport => Error::Transport("connection refused".to_string()),
                Failure::InvalidQuery => Error::InvalidQuery {
                    key: String::new(),
                    message: "bad_data: parse error".to_string(),
                },
            });
        }
        let labels: Labels = [("pod".to_string(), "resnet50-inference-0".to_string())]
            .into_iter()
            .collect();
        let samples = window.grid().map(|ts| Sample::new(ts, 1.5)).collect();
        Ok(vec![RawSeries::new(labels, samples)])
    }

    async fn health(&self) -> Result<()> {
        if self.unhealthy {
            Err(Error::BackendUnhealthy {
                url: "http://fake".to_string(),
                reason: "connection refused".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[derive(Clone, Default)]
struct FakeControl {
    active: Vec<ActivePod>,
    stuck_at: Option<u32>,
    fail_scale_up: bool,
    nodes: Vec<NodeMemory>,
    /// `kubectl top` fails (no metrics API)
    no_node_metrics: bool,
    scaled: Arc<Mutex<Vec<(String, u32)>>>,
    ready_polls: Arc<AtomicU32>,
}

impl FakeControl {
    fn scale_calls(&self) -> Vec<(String, u32)> {
        self.scaled.lock().unwrap().clone()
    }
}

impl WorkloadControl for FakeControl {
    async fn scale(&self, workload: &str, replicas: u32) -> Result<()> {
        self.scaled
            .lock()
            .unwrap()
            .push((workload.to_string(), replicas));
        if self.fail_scale_up && replicas > 0 {
            return Err(Error::ControlPlane("deployment not found".to_string()));
        }
        Ok(())
    }

    async fn ready_replicas(&self, _workload: &str) -> Result<u32> {
        self.ready_polls.fetch_add(1, Ordering::SeqCst);
        let last = self.scaled.lock().unwrap().last().map_or(0, |(_, n)| *n);
        Ok(self.stuck_at.unwrap_or(last))
    }

    async fn active_pods(&self) -> Result<Vec<ActivePod>> {
        Ok(self.active.clone())
    }

    async fn node_memory(&self) -> Result<Vec<NodeMemory>> {
        if self.no_node_metrics {
            return Err(Error::ControlPlane("Metrics API not available".to_string()));
        }
        Ok(self.nodes.clone())
    }
}

fn node(name: &str, percent: u32) -> NodeMemory {
    NodeMemory {
        node: name.to_string(),
        percent,
    }
}

fn matrix() -> Matrix {
    Matrix::new(
        vec![
            "resnet50".to_string(),
            "distilbert".to_string(),
            "whisper".to_string(),
        ],
        vec![1, 2, 3],
    )
}

fn retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        initial_backoff: Duration::from_secs(1),
        max_backoff: Duration::from_secs(5),
        multiplier: 2.0,
    }
}

fn orchestrator(
    backend: FakeBackend,
    control: FakeControl,
    out: &std::path::Path,
) -> Orchestrator<FakeBackend, FakeControl> {
    Orchestrator::new(
        RangeQueryClient::new(backend, retry()),
        control,
        MetricCatalog::standard(),
        matrix(),
        out,
    )
}

fn spec(replicas: u32) -> ExperimentSpec {
    ExperimentSpec::builder("resnet50", replicas).build().unwrap()
}

fn never() -> std::future::Pending<()> {
    std::future::pending()
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_full_run_exports_every_metric() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("phase1");
    let control = FakeControl::default();
    let orch = orchestrator(FakeBackend::default(), control.clone(), &out);

    let report = orch.run(spec(1), false, never()).await.unwrap();

    assert!(report.succeeded(), "failure: {:?}", report.failure);
    assert_eq!(report.run.phase(), Phase::Done);
    assert_eq!(report.run.status(), RunStatus::Exported);
    assert_eq!(report.exported().count(), 15);
    assert!(report.failure.is_none());
    assert_eq!(
        control.scale_calls(),
        vec![("resnet50".to_string(), 1), ("resnet50".to_string(), 0)]
    );

    let manifest = read_manifest(report.manifest.as_ref().unwrap()).unwrap();
    assert_eq!(manifest.status, RunStatus::Exported);
    assert_eq!(manifest.sample_count, 721);
    assert_eq!(manifest.metrics.len(), 15);
}

#[tokio::test(start_paused = true)]
async fn test_run_produces_721_aligned_samples_per_metric() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(FakeBackend::default(), FakeControl::default(), dir.path());

    let report = orch.run(spec(1), false, never()).await.unwrap();
    let window = *report.run.window().unwrap();
    let key = CaptureKey::new("resnet50", 1, window.start());
    let cell = dir.path().join(key.dir_name());

    let timestamps = read_timestamps(cell.join(key.timestamps_file())).unwrap();
    assert_eq!(timestamps.len(), 721);

    for metric in &MetricCatalog::standard() {
        let stored = read_series(cell.join(key.metric_file(metric.key()))).unwrap();
        assert_eq!(stored.rows.len(), 721, "metric {}", metric.key());
        let ts: Vec<_> = stored.rows.iter().map(|r| r.timestamp).collect();
        assert_eq!(ts, timestamps, "metric {} off the shared grid", metric.key());
    }
}

#[tokio::test(start_paused = true)]
async fn test_tracker_reflects_completed_run() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(FakeBackend::default(), FakeControl::default(), dir.path());
    orch.run(spec(1), false, never()).await.unwrap();

    let report = tracker::scan(&matrix(), &MetricCatalog::standard(), dir.path()).unwrap();
    assert!(report.is_completed("resnet50", 1));
    assert!(!report.is_completed("resnet50", 3));
    assert_eq!(report.completed().count(), 1);
    assert_eq!(report.pending().count(), 8);
}

#[tokio::test(start_paused = true)]
async fn test_completed_cell_requires_force() {
    let dir = tempfile::tempdir().unwrap();
    let control = FakeControl::default();
    let orch = orchestrator(FakeBackend::default(), control.clone(), dir.path());
    orch.run(spec(1), false, never()).await.unwrap();
    let calls_after_first = control.scale_calls().len();

    let err = orch.run(spec(1), false, never()).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyCaptured { replicas: 1, .. }));
    assert_eq!(control.scale_calls().len(), calls_after_first);

    // Stamps have one-second resolution
    std::thread::sleep(Duration::from_millis(1100));
    let report = orch.run(spec(1), true, never()).await.unwrap();
    assert!(report.succeeded());

    let entry = tracker::scan_cell("resnet50", 1, &MetricCatalog::standard(), dir.path()).unwrap();
    assert_eq!(entry.captures.len(), 2);
    assert!(entry.captures.iter().all(|c| c.complete));
}

// =============================================================================
// Init preconditions
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_exclusivity_violation_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("phase1");
    let control = FakeControl {
        active: vec![ActivePod {
            workload: "whisper".to_string(),
            pod: "whisper-inference-abc".to_string(),
        }],
        ..FakeControl::default()
    };
    let backend = FakeBackend::default();
    let orch = orchestrator(backend.clone(), control.clone(), &out);

    let err = orch.run(spec(1), false, never()).await.unwrap_err();

    match err {
        Error::ExclusivityViolation { active } => {
            assert_eq!(active, vec!["whisper/whisper-inference-abc".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(control.scale_calls().is_empty(), "cluster was touched");
    assert!(backend.calls.lock().unwrap().is_empty());
    assert!(!out.exists(), "output directory was touched");
}

#[tokio::test(start_paused = true)]
async fn test_own_leftover_pods_do_not_violate_exclusivity() {
    let dir = tempfile::tempdir().unwrap();
    let control = FakeControl {
        active: vec![ActivePod {
            workload: "resnet50".to_string(),
            pod: "resnet50-inference-old".to_string(),
        }],
        ..FakeControl::default()
    };
    let orch = orchestrator(FakeBackend::default(), control, dir.path());
    assert!(orch.run(spec(1), false, never()).await.unwrap().succeeded());
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_backend_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("phase1");
    let control = FakeControl::default();
    let backend = FakeBackend {
        unhealthy: true,
        ..FakeBackend::default()
    };
    let orch = orchestrator(backend, control.clone(), &out);

    let err = orch.run(spec(1), false, never()).await.unwrap_err();
    assert!(matches!(err, Error::BackendUnhealthy { .. }));
    assert!(control.scale_calls().is_empty());
    assert!(!out.exists());
}

#[tokio::test(start_paused = true)]
async fn test_node_memory_pressure_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("phase1");
    let control = FakeControl {
        nodes: vec![node("gpu-node-1", 62), node("gpu-node-2", 91)],
        ..FakeControl::default()
    };
    let backend = FakeBackend::default();
    let orch = orchestrator(backend.clone(), control.clone(), &out);

    let err = orch.run(spec(1), false, never()).await.unwrap_err();

    match err {
        Error::NodeMemoryPressure { nodes, limit } => {
            assert_eq!(nodes, vec!["gpu-node-2 at 91%".to_string()]);
            assert_eq!(limit, 85);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(control.scale_calls().is_empty(), "cluster was touched");
    assert!(backend.calls.lock().unwrap().is_empty());
    assert!(!out.exists(), "output directory was touched");
}

#[tokio::test(start_paused = true)]
async fn test_node_memory_at_limit_is_allowed() {
    let dir = tempfile::tempdir().unwrap();
    let control = FakeControl {
        nodes: vec![node("gpu-node-1", 85)],
        ..FakeControl::default()
    };
    let orch = orchestrator(FakeBackend::default(), control, dir.path());
    assert!(orch.run(spec(1), false, never()).await.unwrap().succeeded());
}

#[tokio::test(start_paused = true)]
async fn test_node_memory_limit_is_configurable() {
    let dir = tempfile::tempdir().unwrap();
    let control = FakeControl {
        nodes: vec![node("gpu-node-1", 72)],
        ..FakeControl::default()
    };
    let orch = orchestrator(FakeBackend::default(), control, dir.path());
    let spec = ExperimentSpec::builder("resnet50", 1)
        .max_node_memory_percent(70)
        .build()
        .unwrap();

    let err = orch.run(spec, false, never()).await.unwrap_err();
    assert!(matches!(err, Error::NodeMemoryPressure { limit: 70, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_missing_node_metrics_skips_memory_check() {
    let dir = tempfile::tempdir().unwrap();
    let control = FakeControl {
        no_node_metrics: true,
        ..FakeControl::default()
    };
    let orch = orchestrator(FakeBackend::default(), control, dir.path());
    assert!(orch.run(spec(1), false, never()).await.unwrap().succeeded());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_workload_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(FakeBackend::default(), FakeControl::default(), dir.path());
    let spec = ExperimentSpec::builder("llama", 1).build().unwrap();

    let err = orch.run(spec, false, never()).await.unwrap_err();
    assert!(matches!(err, Error::UnknownWorkload { .. }));
}

// =============================================================================
// Failure isolation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_transient_failure_isolated_to_one_metric() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend {
        failures: vec![("DCGM_FI_DEV_POWER_USAGE", Failure::Transport)],
        ..FakeBackend::default()
    };
    let orch = orchestrator(backend.clone(), FakeControl::default(), dir.path());

    let report = orch.run(spec(1), false, never()).await.unwrap();

    assert!(!report.succeeded());
    assert_eq!(report.run.status(), RunStatus::Failed);
    assert_eq!(report.outcomes.len(), 15);
    assert_eq!(report.exported().count(), 14);
    let failed: Vec<_> = report.failed().map(MetricOutcome::key).collect();
    assert_eq!(failed, vec!["gpu_power"]);

    // Retried up to max_attempts
    let power_calls = backend
        .calls
        .lock()
        .unwrap()
        .iter()
        .filter(|q| q.contains("DCGM_FI_DEV_POWER_USAGE"))
        .count();
    assert_eq!(power_calls, 2);

    let manifest = read_manifest(report.manifest.as_ref().unwrap()).unwrap();
    assert_eq!(manifest.status, RunStatus::Failed);
    assert_eq!(manifest.exported_keys().count(), 14);

    let entry = tracker::scan_cell("resnet50", 1, &MetricCatalog::standard(), dir.path()).unwrap();
    assert!(!entry.completed);
    assert_eq!(entry.captures.len(), 1);
    assert_eq!(entry.captures[0].metrics_missing, vec!["gpu_power".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_query_aborts_export() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend {
        failures: vec![("DCGM_FI_DEV_GPU_UTIL", Failure::InvalidQuery)],
        ..FakeBackend::default()
    };
    let control = FakeControl::default();
    let orch = orchestrator(backend.clone(), control.clone(), dir.path());

    let report = orch.run(spec(1), false, never()).await.unwrap();

    assert_eq!(report.run.status(), RunStatus::Failed);
    let keys: Vec<_> = report.outcomes.iter().map(MetricOutcome::key).collect();
    assert_eq!(keys, vec!["cpu_usage", "memory_usage", "gpu_utilization"]);
    assert!(report
        .failure
        .as_deref()
        .unwrap()
        .contains("gpu_utilization"));
    // Rejected queries are not retried
    assert_eq!(backend.calls.lock().unwrap().len(), 3);
    assert_eq!(control.scale_calls().last(), Some(&("resnet50".to_string(), 0)));
}

// =============================================================================
// Control plane failures and cancellation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_scale_failure_still_scales_down() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("phase1");
    let control = FakeControl {
        fail_scale_up: true,
        ..FakeControl::default()
    };
    let orch = orchestrator(FakeBackend::default(), control.clone(), &out);

    let report = orch.run(spec(2), false, never()).await.unwrap();

    assert_eq!(report.run.status(), RunStatus::Failed);
    assert!(report.manifest.is_none());
    assert!(report.failure.as_deref().unwrap().contains("Control plane"));
    assert_eq!(
        control.scale_calls(),
        vec![("resnet50".to_string(), 2), ("resnet50".to_string(), 0)]
    );
    assert!(!out.exists());
}

#[tokio::test(start_paused = true)]
async fn test_ready_timeout_fails_run() {
    let dir = tempfile::tempdir().unwrap();
    let control = FakeControl {
        stuck_at: Some(1),
        ..FakeControl::default()
    };
    let orch = orchestrator(FakeBackend::default(), control.clone(), dir.path())
        .with_ready_poll(Duration::from_secs(2));
    let spec = ExperimentSpec::builder("resnet50", 3)
        .ready_timeout(Duration::from_secs(20))
        .build()
        .unwrap();

    let report = orch.run(spec, false, never()).await.unwrap();

    assert_eq!(report.run.status(), RunStatus::Failed);
    let failure = report.failure.unwrap();
    assert!(failure.contains("1/3"), "{failure}");
    // Polled at 0, 2, .., 20s
    assert_eq!(control.ready_polls.load(Ordering::SeqCst), 11);
    assert_eq!(control.scale_calls().last(), Some(&("resnet50".to_string(), 0)));
    let phases: Vec<_> = report.run.history().iter().map(|c| c.phase).collect();
    assert_eq!(
        phases,
        vec![Phase::Init, Phase::Scaling, Phase::CleaningUp, Phase::Failed]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_cleans_up_without_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let control = FakeControl::default();
    let backend = FakeBackend::default();
    let orch = orchestrator(backend.clone(), control.clone(), dir.path());

    // Stabilization is 300s, so this fires during recording
    let shutdown = tokio::time::sleep(Duration::from_secs(600));
    let report = orch.run(spec(1), false, shutdown).await.unwrap();

    assert_eq!(report.run.status(), RunStatus::Failed);
    assert!(report.failure.as_deref().unwrap().contains("cancelled during recording"));
    assert!(report.manifest.is_none());
    assert!(report.outcomes.is_empty());
    assert!(backend.calls.lock().unwrap().is_empty(), "queried before window closed");
    assert_eq!(control.scale_calls().last(), Some(&("resnet50".to_string(), 0)));

    let entry = tracker::scan_cell("resnet50", 1, &MetricCatalog::standard(), dir.path()).unwrap();
    assert!(!entry.completed);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_export_leaves_attributable_partial_capture() {
    let dir = tempfile::tempdir().unwrap();
    let control = FakeControl::default();
    // gpu_power is the fifth metric; its query hangs for an hour
    let backend = FakeBackend {
        stall: Some(("DCGM_FI_DEV_POWER_USAGE", Duration::from_secs(3_600))),
        ..FakeBackend::default()
    };
    let orch = orchestrator(backend, control.clone(), dir.path());

    // 300s stabilization + 3600s recording + 30s scrape lag, then exporting
    let shutdown = tokio::time::sleep(Duration::from_secs(3_930 + 600));
    let report = orch.run(spec(1), false, shutdown).await.unwrap();

    assert_eq!(report.run.status(), RunStatus::Failed);
    assert!(report.failure.as_deref().unwrap().contains("cancelled during exporting"));
    assert!(report.manifest.is_none());
    assert_eq!(control.scale_calls().last(), Some(&("resnet50".to_string(), 0)));

    let window = *report.run.window().unwrap();
    let key = CaptureKey::new("resnet50", 1, window.start());
    let cell = dir.path().join(key.dir_name());
    assert!(cell.join(key.timestamps_file()).exists());
    for metric in ["cpu_usage", "memory_usage", "gpu_utilization", "gpu_memory"] {
        assert!(cell.join(key.metric_file(metric)).exists(), "{metric} missing");
    }
    assert!(!cell.join(key.metric_file("gpu_power")).exists());
    assert!(!cell.join(key.manifest_file()).exists());

    let entry = tracker::scan_cell("resnet50", 1, &MetricCatalog::standard(), dir.path()).unwrap();
    assert!(!entry.completed);
    assert_eq!(entry.captures.len(), 1);
    let capture = &entry.captures[0];
    assert!(!capture.complete);
    assert_eq!(capture.stamp, key.stamp());
    assert_eq!(capture.metrics_present, 4);
    assert!(capture.has_timestamps);
    assert_eq!(capture.manifest_status, None);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_already_signalled_cancels_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let control = FakeControl::default();
    let orch = orchestrator(FakeBackend::default(), control.clone(), dir.path());

    let report = orch
        .run(spec(1), false, std::future::ready(()))
        .await
        .unwrap();

    assert_eq!(report.run.status(), RunStatus::Failed);
    assert!(report.failure.as_deref().unwrap().contains("cancelled"));
    assert!(report.manifest.is_none());
    assert_eq!(report.run.phase(), Phase::Failed);
    assert_eq!(control.scale_calls().last(), Some(&("resnet50".to_string(), 0)));
}

#[tokio::test(start_paused = true)]
async fn test_phase_history_follows_state_machine() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(FakeBackend::default(), FakeControl::default(), dir.path());

    let report = orch.run(spec(1), false, never()).await.unwrap();

    let phases: Vec<_> = report.run.history().iter().map(|c| c.phase).collect();
    assert_eq!(
        phases,
        vec![
            Phase::Init,
            Phase::Scaling,
            Phase::Stabilizing,
            Phase::Recording,
            Phase::Exporting,
            Phase::CleaningUp,
            Phase::Done,
        ]
    );
}
