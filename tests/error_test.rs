//! Tests for error types

use trueno_capture::Error;

#[test]
fn test_invalid_query_error() {
    let error = Error::InvalidQuery {
        key: "gpu_power".to_string(),
        message: "parse error at char 12".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Invalid query for metric 'gpu_power'"));
    assert!(error_str.contains("Fix the query template"));
    assert!(error.is_fatal());
    assert!(!error.is_retryable());
}

#[test]
fn test_retries_exhausted_error() {
    let error = Error::RetriesExhausted {
        key: "cpu_usage".to_string(),
        attempts: 4,
        last: "connection reset".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("after 4 attempts"));
    assert!(error_str.contains("connection reset"));
    // Isolated per metric, never aborts the run
    assert!(!error.is_fatal());
    assert!(!error.is_retryable());
}

#[test]
fn test_exclusivity_violation_error() {
    let error = Error::ExclusivityViolation {
        active: vec![
            "whisper/whisper-inference-1".to_string(),
            "distilbert/distilbert-inference-2".to_string(),
        ],
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("whisper/whisper-inference-1, distilbert/distilbert-inference-2"));
    assert!(error_str.contains("Scale them to zero first"));
}

#[test]
fn test_node_memory_pressure_error() {
    let error = Error::NodeMemoryPressure {
        nodes: vec!["gpu-node-1 at 91%".to_string()],
        limit: 85,
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("gpu-node-1 at 91%"));
    assert!(error_str.contains("limit 85%"));
    assert!(!error.is_retryable());
}

#[test]
fn test_already_captured_error() {
    let error = Error::AlreadyCaptured {
        workload: "resnet50".to_string(),
        replicas: 3,
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("resnet50 x 3"));
    assert!(error_str.contains("--force"));
}

#[test]
fn test_ready_timeout_error() {
    let error = Error::ReadyTimeout {
        workload: "whisper".to_string(),
        ready: 2,
        wanted: 8,
        waited_secs: 300,
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("300s"));
    assert!(error_str.contains("2/8"));
    assert!(error.is_fatal());
}

#[test]
fn test_unknown_workload_error() {
    let error = Error::UnknownWorkload {
        name: "llama".to_string(),
        available: "resnet50, distilbert, whisper".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Unknown workload 'llama'"));
    assert!(error_str.contains("Available: resnet50, distilbert, whisper"));
}

#[test]
fn test_storage_error() {
    let error = Error::StorageError("file not found".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Storage error"));
    assert!(error_str.contains("file not found"));
}

#[test]
fn test_transport_error_is_retryable() {
    let error = Error::Transport("timed out".to_string());
    assert!(error.is_retryable());
    assert!(!error.is_fatal());
}

#[test]
fn test_io_error_conversion() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let error: Error = io_error.into();
    let error_str = format!("{error}");
    assert!(error_str.contains("IO error"));
}

#[test]
fn test_json_error_conversion() {
    let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let error: Error = json_error.into();
    assert!(format!("{error}").contains("JSON error"));
}

#[test]
fn test_toml_error_conversion() {
    let toml_error = toml::from_str::<toml::Value>("= nope").unwrap_err();
    let error: Error = toml_error.into();
    assert!(format!("{error}").contains("Config parse error"));
}

#[test]
fn test_error_debug() {
    let error = Error::Cancelled("recording".to_string());
    let debug_str = format!("{error:?}");
    assert!(debug_str.contains("Cancelled"));
    assert_eq!(format!("{error}"), "Run cancelled during recording");
}
