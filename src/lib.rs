//! # Trueno-Capture: Experiment Telemetry Capture Pipeline
//!
//! **Version**: 0.1.0 (Phase 1 collection)
//!
//! Trueno-Capture runs controlled inference experiments (one workload at N
//! replicas), records a fixed time window, and exports every metric of a
//! declarative catalog as a temporally aligned Parquet dataset.
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Poka-Yoke**: Catalog validation rejects container-scoped queries
//!   without their container filter before any run starts
//! - **Jidoka**: Temporal exclusivity is a hard precondition; a run stops
//!   before touching anything if another workload is active
//! - **Genchi Genbutsu**: The output directory is the only bookkeeping;
//!   completion is derived from the artifacts actually on disk
//! - **Muda elimination**: Absent samples stay absent; nothing is
//!   interpolated, merged, or recomputed
//!
//! ## Pipeline
//!
//! ```text
//! tracker (pending) ─> orchestrator ─> scale ─> stabilize ─> record
//!                                                              │
//!      manifest <─ dataset writer <─ sample aligner <─ query client (per metric)
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//! use trueno_capture::config::CaptureConfig;
//! use trueno_capture::tracker;
//!
//! let config = CaptureConfig::load_or_default("capture.toml")?;
//! let report = tracker::scan(&config.matrix(), &config.catalog(), Path::new(&config.output.dir))?;
//! for entry in report.pending() {
//!     println!("pending: {} x {}", entry.workload, entry.replicas);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod align;
pub mod catalog;
pub mod config;
pub mod dataset;
pub mod error;
pub mod experiment;
pub mod orchestrator;
pub mod query;
pub mod tracker;

pub use error::{Error, Result};
