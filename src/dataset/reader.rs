//! Read-back of written artifacts (tracker and verification)

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use arrow::array::{Array, Float64Array, StringArray, TimestampMillisecondArray, UInt32Array};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use super::Manifest;
use crate::{Error, Result};

/// One stored metric row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    /// Grid timestamp.
    pub timestamp: DateTime<Utc>,
    /// Value, `None` when absent.
    pub value: Option<f64>,
    /// Label-set index.
    pub series: u32,
    /// Label-set JSON.
    pub labels: String,
}

/// A metric artifact loaded into memory.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSeries {
    /// Schema metadata (`capture.*` keys).
    pub metadata: HashMap<String, String>,
    /// Rows in file order.
    pub rows: Vec<StoredRow>,
}

impl StoredSeries {
    /// Distinct label-sets.
    #[must_use]
    pub fn series_count(&self) -> usize {
        let mut seen: Vec<u32> = self.rows.iter().map(|r| r.series).collect();
        seen.sort_unstable();
        seen.dedup();
        seen.len()
    }
}

fn load_batches(path: &Path) -> Result<(HashMap<String, String>, Vec<RecordBatch>)> {
    let file = File::open(path)
        .map_err(|e| Error::StorageError(format!("Failed to open Parquet file: {e}")))?;

    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| Error::StorageError(format!("Failed to parse Parquet file: {e}")))?;
    let metadata = builder.schema().metadata().clone();

    let reader = builder
        .build()
        .map_err(|e| Error::StorageError(format!("Failed to create Parquet reader: {e}")))?;

    let batches = reader
        .map(|batch| {
            batch.map_err(|e| Error::StorageError(format!("Failed to read record batch: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((metadata, batches))
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| Error::StorageError(format!("column '{name}' missing or mistyped")))
}

fn to_time(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| Error::StorageError(format!("timestamp {millis} out of range")))
}

/// Load a metric artifact.
///
/// # Errors
///
/// Returns error if the file is missing, unreadable, or not a metric artifact.
pub fn read_series(path: impl AsRef<Path>) -> Result<StoredSeries> {
    let (metadata, batches) = load_batches(path.as_ref())?;
    let mut rows = Vec::new();
    for batch in &batches {
        let timestamps = column::<TimestampMillisecondArray>(batch, "timestamp")?;
        let values = column::<Float64Array>(batch, "value")?;
        let series = column::<UInt32Array>(batch, "series")?;
        let labels = column::<StringArray>(batch, "labels")?;
        for i in 0..batch.num_rows() {
            rows.push(StoredRow {
                timestamp: to_time(timestamps.value(i))?,
                value: (!values.is_null(i)).then(|| values.value(i)),
                series: series.value(i),
                labels: labels.value(i).to_string(),
            });
        }
    }
    Ok(StoredSeries { metadata, rows })
}

/// Load the shared timestamps artifact.
///
/// # Errors
///
/// Returns error if the file is missing or unreadable.
pub fn read_timestamps(path: impl AsRef<Path>) -> Result<Vec<DateTime<Utc>>> {
    let (_, batches) = load_batches(path.as_ref())?;
    let mut out = Vec::new();
    for batch in &batches {
        let timestamps = column::<TimestampMillisecondArray>(batch, "timestamp")?;
        for i in 0..batch.num_rows() {
            out.push(to_time(timestamps.value(i))?);
        }
    }
    Ok(out)
}

/// Load a manifest.
///
/// # Errors
///
/// Returns error if the file is missing or not a valid manifest.
pub fn read_manifest(path: impl AsRef<Path>) -> Result<Manifest> {
    let file = File::open(path.as_ref())
        .map_err(|e| Error::StorageError(format!("Failed to open manifest: {e}")))?;
    Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_storage_error() {
        let err = read_series("/nonexistent/file.parquet").unwrap_err();
        assert!(matches!(err, Error::StorageError(_)));
        assert!(read_manifest("/nonexistent/m.json").is_err());
    }

    #[test]
    fn test_garbage_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.parquet");
        std::fs::write(&path, b"not parquet").unwrap();
        assert!(read_timestamps(&path).is_err());
    }
}
