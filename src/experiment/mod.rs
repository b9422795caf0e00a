//! Experiment Tracking Schema
//!
//! Data structures threaded through one capture.
//!
//! ## Schema Overview
//!
//! ```text
//! ExperimentSpec (immutable) ──> ExperimentRun (phase + status + window)
//!                                      │
//!                                      └──< MetricOutcome (N) ──> RunReport
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use trueno_capture::experiment::{ExperimentRun, ExperimentSpec, Phase, RunStatus};
//!
//! let spec = ExperimentSpec::builder("resnet50", 1).build()?;
//! let mut run = ExperimentRun::new(spec);
//!
//! run.advance(Phase::Scaling)?;
//! assert_eq!(run.status(), RunStatus::Pending);
//!
//! run.advance(Phase::Failed)?;
//! assert_eq!(run.status(), RunStatus::Failed);
//! # Ok::<(), trueno_capture::Error>(())
//! ```

mod report;
mod run;
mod spec;

pub use report::{MetricOutcome, RunReport};
pub use run::{ExperimentRun, Phase, PhaseChange, RunStatus};
pub use spec::{ExperimentSpec, ExperimentSpecBuilder, DEFAULT_MAX_NODE_MEMORY_PERCENT};
