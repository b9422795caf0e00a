//! Dataset Writer (Arrow/Parquet)
//!
//! Persists one Parquet artifact per metric, one shared timestamps artifact,
//! and a JSON manifest per run.
//!
//! **Write-once design**:
//! - Every file is written to a hidden `.<name>.partial` file, fsynced, then
//!   renamed into place. A directory scan never sees a truncated artifact
//!   under its final name.
//! - Existing artifacts are never overwritten; a fresh run gets a fresh stamp.
//! - The manifest is written last. Its presence with status `exported` is
//!   what makes a capture complete.
//!
//! ## Metric Schema
//!
//! ```text
//! timestamp  Timestamp(ms, UTC)  not null   grid point
//! value      Float64             nullable   null = no data (never interpolated)
//! series     UInt32              not null   label-set index
//! labels     Utf8                not null   label-set as canonical JSON
//! ```

mod manifest;
mod naming;
mod reader;

pub use manifest::{Manifest, MANIFEST_VERSION};
pub use naming::{cell_dir_name, parse_artifact, parse_stamp, ArtifactKind, CaptureKey, ParsedArtifact};
pub use reader::{read_manifest, read_series, read_timestamps, StoredRow, StoredSeries};

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, StringArray, TimestampMillisecondArray, UInt32Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;

use crate::align::AlignedSeries;
use crate::query::QueryWindow;
use crate::{Error, Result};

/// Schema metadata keys.
pub mod meta {
    /// Metric key.
    pub const METRIC: &str = "capture.metric";
    /// Workload identifier.
    pub const WORKLOAD: &str = "capture.workload";
    /// Replica count.
    pub const REPLICAS: &str = "capture.replicas";
    /// Window start (RFC 3339).
    pub const START: &str = "capture.start";
    /// Window end (RFC 3339).
    pub const END: &str = "capture.end";
    /// Step in milliseconds.
    pub const STEP_MS: &str = "capture.step_ms";
}

const TIMEZONE: &str = "UTC";

/// Writes a run's artifacts under `<root>/<workload>_r<N>/`.
#[derive(Debug, Clone)]
pub struct DatasetWriter {
    root: PathBuf,
}

impl DatasetWriter {
    /// Create a writer rooted at the collection phase directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of one capture's cell.
    #[must_use]
    pub fn capture_dir(&self, key: &CaptureKey) -> PathBuf {
        self.root.join(key.dir_name())
    }

    /// Persist one metric's aligned samples.
    ///
    /// # Errors
    ///
    /// Returns error if the artifact already exists or cannot be written.
    pub fn write_series(&self, key: &CaptureKey, series: &AlignedSeries) -> Result<PathBuf> {
        let schema = Arc::new(metric_schema(window_metadata(
            key,
            series.window(),
            Some(series.key()),
        )));
        let batch = series_batch(&schema, series)?;
        let name = key.metric_file(series.key());
        self.write_parquet(key, &name, schema, &batch)
    }

    /// Persist the shared grid every metric artifact of the run aligns to.
    ///
    /// # Errors
    ///
    /// Returns error if the artifact already exists or cannot be written.
    pub fn write_timestamps(&self, key: &CaptureKey, window: &QueryWindow) -> Result<PathBuf> {
        let schema = Arc::new(
            Schema::new(vec![timestamp_field()]).with_metadata(window_metadata(key, window, None)),
        );
        let timestamps = TimestampMillisecondArray::from(
            window.grid().map(|ts| ts.timestamp_millis()).collect::<Vec<_>>(),
        )
        .with_timezone(TIMEZONE);
        let batch = RecordBatch::try_new(schema.clone(), vec![Arc::new(timestamps) as ArrayRef])?;
        self.write_parquet(key, &key.timestamps_file(), schema, &batch)
    }

    /// Persist the manifest. Call after every other artifact of the run.
    ///
    /// # Errors
    ///
    /// Returns error if the manifest already exists or cannot be written.
    pub fn write_manifest(&self, key: &CaptureKey, manifest: &Manifest) -> Result<PathBuf> {
        let dir = self.ensure_dir(key)?;
        write_atomic(&dir, &key.manifest_file(), |mut file| {
            serde_json::to_writer_pretty(&mut file, manifest)?;
            file.write_all(b"\n")?;
            Ok(file)
        })
    }

    fn ensure_dir(&self, key: &CaptureKey) -> Result<PathBuf> {
        let dir = self.capture_dir(key);
        fs::create_dir_all(&dir).map_err(|e| {
            Error::StorageError(format!("cannot create {}: {e}", dir.display()))
        })?;
        Ok(dir)
    }

    fn write_parquet(
        &self,
        key: &CaptureKey,
        name: &str,
        schema: SchemaRef,
        batch: &RecordBatch,
    ) -> Result<PathBuf> {
        let dir = self.ensure_dir(key)?;
        let path = write_atomic(&dir, name, |file| {
            let props = WriterProperties::builder().build();
            let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
            if batch.num_rows() > 0 {
                writer.write(batch)?;
            }
            Ok(writer.into_inner()?)
        })?;
        tracing::debug!(path = %path.display(), rows = batch.num_rows(), "artifact written");
        Ok(path)
    }
}

/// Write via a hidden temp file, fsync, then rename into place.
fn write_atomic<F>(dir: &Path, name: &str, write: F) -> Result<PathBuf>
where
    F: FnOnce(File) -> Result<File>,
{
    let path = dir.join(name);
    if path.exists() {
        return Err(Error::StorageError(format!(
            "refusing to overwrite existing artifact {}",
            path.display()
        )));
    }
    let tmp = dir.join(format!(".{name}.partial"));

    let result = File::create(&tmp)
        .map_err(Error::from)
        .and_then(write)
        .and_then(|file| file.sync_all().map_err(Error::from));
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }

    fs::rename(&tmp, &path)?;
    Ok(path)
}

fn timestamp_field() -> Field {
    Field::new(
        "timestamp",
        DataType::Timestamp(TimeUnit::Millisecond, Some(TIMEZONE.into())),
        false,
    )
}

fn metric_schema(metadata: HashMap<String, String>) -> Schema {
    Schema::new(vec![
        timestamp_field(),
        Field::new("value", DataType::Float64, true),
        Field::new("series", DataType::UInt32, false),
        Field::new("labels", DataType::Utf8, false),
    ])
    .with_metadata(metadata)
}

fn window_metadata(
    key: &CaptureKey,
    window: &QueryWindow,
    metric: Option<&str>,
) -> HashMap<String, String> {
    let mut metadata = HashMap::from([
        (meta::WORKLOAD.to_string(), key.workload().to_string()),
        (meta::REPLICAS.to_string(), key.replicas().to_string()),
        (meta::START.to_string(), window.start().to_rfc3339()),
        (meta::END.to_string(), window.end().to_rfc3339()),
        (meta::STEP_MS.to_string(), window.step_ms().to_string()),
    ]);
    if let Some(metric) = metric {
        metadata.insert(meta::METRIC.to_string(), metric.to_string());
    }
    metadata
}

fn series_batch(schema: &SchemaRef, series: &AlignedSeries) -> Result<RecordBatch> {
    let labels_json = series
        .label_sets()
        .iter()
        .map(|set| serde_json::to_string(&set.labels))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let capacity = series.row_count();
    let mut timestamps = Vec::with_capacity(capacity);
    let mut values = Vec::with_capacity(capacity);
    let mut indices = Vec::with_capacity(capacity);
    let mut labels = Vec::with_capacity(capacity);
    for row in series.rows() {
        timestamps.push(row.timestamp.timestamp_millis());
        values.push(row.value);
        indices.push(u32::try_from(row.series).map_err(|_| {
            Error::StorageError(format!("too many label-sets for '{}'", series.key()))
        })?);
        labels.push(labels_json[row.series].as_str());
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(TimestampMillisecondArray::from(timestamps).with_timezone(TIMEZONE)),
        Arc::new(Float64Array::from(values)),
        Arc::new(UInt32Array::from(indices)),
        Arc::new(StringArray::from(labels)),
    ];
    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}
