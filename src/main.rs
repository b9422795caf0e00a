//! Trueno-Capture CLI
//!
//! Runs one experiment capture, reports matrix progress, and validates the
//! configuration and metric catalog.
//!
//! Exit codes: 0 run done, 1 run failed, 2 invalid input or precondition
//! failure.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use trueno_capture::config::CaptureConfig;
use trueno_capture::experiment::{MetricOutcome, RunReport};
use trueno_capture::orchestrator::{KubectlControl, Orchestrator};
use trueno_capture::query::{PrometheusBackend, RangeQueryClient};
use trueno_capture::tracker::{self, MatrixReport};

const EXIT_FAILED: u8 = 1;
const EXIT_INVALID: u8 = 2;

#[derive(Parser)]
#[command(name = "trueno-capture", version, about = "Experiment telemetry capture")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one capture: scale, stabilize, record, export, clean up
    Run {
        /// Workload identifier (e.g. resnet50)
        workload: String,

        /// Replica count
        replicas: u32,

        /// Path to capture.toml config file
        #[arg(short, long, default_value = "capture.toml")]
        config: PathBuf,

        /// Capture again even if the cell is already completed
        #[arg(long)]
        force: bool,
    },

    /// Show completed and pending matrix cells
    Status {
        /// Path to capture.toml config file
        #[arg(short, long, default_value = "capture.toml")]
        config: PathBuf,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration and metric catalog
    Validate {
        /// Path to capture.toml config file
        #[arg(short, long, default_value = "capture.toml")]
        config: PathBuf,
    },

    /// Print the metric catalog with rendered queries
    Catalog {
        /// Path to capture.toml config file
        #[arg(short, long, default_value = "capture.toml")]
        config: PathBuf,

        /// Workload to render queries for (defaults to the first declared)
        #[arg(short, long)]
        workload: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();

    match dispatch(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_INVALID)
        }
    }
}

async fn dispatch(command: Commands) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Run {
            workload,
            replicas,
            config,
            force,
        } => {
            let config = load(&config)?;
            let spec = config.experiment_spec(&workload, replicas)?;

            let backend = PrometheusBackend::new(&config.backend.url, config.request_timeout())?;
            let client = RangeQueryClient::new(backend, config.retry_policy());
            let control = KubectlControl::new(config.workloads.clone());
            let orchestrator = Orchestrator::new(
                client,
                control,
                config.catalog(),
                config.matrix(),
                &config.output.dir,
            );

            let report = orchestrator.run(spec, force, shutdown_signal()).await?;
            print_report(&report);
            Ok(if report.succeeded() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_FAILED)
            })
        }
        Commands::Status { config, json } => {
            let config = load(&config)?;
            let report = tracker::scan(&config.matrix(), &config.catalog(), &config.output.dir)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_status(&report, &config.output.dir);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Validate { config } => {
            let config = load(&config)?;
            let catalog = config.catalog();
            println!(
                "OK: {} workloads x {} replica counts, {} metrics",
                config.workloads.len(),
                config.matrix.replicas.len(),
                catalog.len()
            );
            println!(
                "    window {}s at {}s step ({} samples per series)",
                config.timing.recording_secs,
                config.timing.step_secs,
                config.timing.recording_secs / config.timing.step_secs + 1
            );
            let exclusive = catalog
                .iter()
                .filter(|m| m.domain().requires_exclusivity())
                .count();
            println!(
                "    {exclusive} device/node metrics rely on one workload at a time; \
                 runs refuse to start above {}% node memory",
                config.preconditions.max_node_memory_percent
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Catalog { config, workload } => {
            let config = load(&config)?;
            let workload = match workload {
                Some(name) => config.workload(&name)?.name.clone(),
                None => config
                    .workloads
                    .first()
                    .map(|w| w.name.clone())
                    .context("no workloads declared")?,
            };
            for metric in &config.catalog() {
                let scope = if metric.domain().requires_exclusivity() {
                    "exclusive"
                } else {
                    "scoped"
                };
                println!(
                    "{:<24} {:<9} {:<9} {:<8} {}",
                    metric.key(),
                    metric.domain().to_string(),
                    scope,
                    metric.unit(),
                    metric.render(&workload)
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load(path: &Path) -> anyhow::Result<CaptureConfig> {
    CaptureConfig::load_or_default(path)
        .with_context(|| format!("invalid configuration {}", path.display()))
}

/// Resolves on the first Ctrl-C. Never resolves if the handler cannot be installed.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

fn print_report(report: &RunReport) {
    let spec = report.run.spec();
    println!();
    println!("=== {} x {} : {} ===", spec.workload(), spec.replicas(), report.run.status());
    if let Some(window) = report.run.window() {
        println!("Window: {} .. {} ({} samples)", window.start(), window.end(), window.len());
    }
    for outcome in &report.outcomes {
        match outcome {
            MetricOutcome::Exported {
                key,
                series,
                rows,
                warnings,
                ..
            } => {
                println!("  ok    {key:<24} {series} series, {rows} rows");
                for warning in warnings {
                    println!("          warning: {warning}");
                }
            }
            MetricOutcome::Failed { key, reason, .. } => {
                println!("  FAIL  {key:<24} {reason}");
            }
        }
    }
    println!(
        "Exported {}/{} metrics, {} warnings",
        report.exported().count(),
        report.outcomes.len(),
        report.warning_count()
    );
    if let Some(failure) = &report.failure {
        println!("Failure: {failure}");
    }
    if let Some(error) = &report.cleanup_error {
        println!("Cleanup: {error}");
    }
    if let Some(manifest) = &report.manifest {
        println!("Manifest: {}", manifest.display());
    }
}

fn print_status(report: &MatrixReport, dir: &Path) {
    println!("Output: {}", dir.display());
    for entry in report.entries() {
        let state = if entry.completed { "completed" } else { "pending" };
        println!("  {:<12} r{:<3} {state}", entry.workload, entry.replicas);
        for capture in &entry.captures {
            let manifest = capture
                .manifest_status
                .map_or_else(|| "no manifest".to_string(), |s| s.to_string());
            println!(
                "      {} {} metrics, timestamps: {}, {manifest}{}",
                capture.stamp,
                capture.metrics_present,
                if capture.has_timestamps { "yes" } else { "no" },
                if capture.complete { "" } else { " (partial)" }
            );
        }
    }
    println!(
        "{} completed, {} pending",
        report.completed().count(),
        report.pending().count()
    );
}
