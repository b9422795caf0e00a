//! Prometheus `query_range` backend

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::DateTime;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::{MetricsBackend, QueryWindow, RawSeries, Sample};
use crate::{Error, Result};

/// HTTP client for a Prometheus-compatible range-query API.
#[derive(Debug, Clone)]
pub struct PrometheusBackend {
    base_url: String,
    client: Client,
}

impl PrometheusBackend {
    /// Create a backend for `base_url` (e.g., "http://localhost:9090").
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be constructed.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::Config("backend url must not be empty".to_string()));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url, client })
    }

    /// Base URL without trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl MetricsBackend for PrometheusBackend {
    #[tracing::instrument(skip(self, window), err)]
    async fn range_query(&self, query: &str, window: &QueryWindow) -> Result<Vec<RawSeries>> {
        let url = format!("{}/api/v1/query_range", self.base_url);
        let step = format!("{}ms", window.step_ms());
        let start = window.start().timestamp().to_string();
        let end = window.end().timestamp().to_string();

        let response = self
            .client
            .get(&url)
            .query(&[
                ("query", query),
                ("start", start.as_str()),
                ("end", end.as_str()),
                ("step", step.as_str()),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        parse_range_response(status, &body)
    }

    #[tracing::instrument(skip(self), err)]
    async fn health(&self) -> Result<()> {
        let url = format!("{}/-/healthy", self.base_url);
        let unhealthy = |reason: String| Error::BackendUnhealthy {
            url: self.base_url.clone(),
            reason,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| unhealthy(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(unhealthy(format!("status {}", response.status())))
        }
    }
}

fn transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        Error::Transport(err.to_string())
    } else {
        Error::from(err)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<MatrixData>,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatrixData {
    result_type: String,
    #[serde(default)]
    result: Vec<MatrixResult>,
}

#[derive(Debug, Deserialize)]
struct MatrixResult {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

/// Classify an HTTP status + body into series or a typed error.
fn parse_range_response(status: StatusCode, body: &str) -> Result<Vec<RawSeries>> {
    let parsed: std::result::Result<ApiResponse, _> = serde_json::from_str(body);

    if !status.is_success() {
        let (error_type, message) = match &parsed {
            Ok(api) => (
                api.error_type.clone().unwrap_or_default(),
                api.error.clone().unwrap_or_else(|| status.to_string()),
            ),
            Err(_) => (String::new(), format!("status {status}: {}", truncate(body))),
        };
        return Err(classify(status, &error_type, message));
    }

    let api = parsed.map_err(|e| Error::MalformedResponse(format!("{e}: {}", truncate(body))))?;
    if api.status != "success" {
        let error_type = api.error_type.unwrap_or_default();
        let message = api.error.unwrap_or_else(|| "unknown error".to_string());
        return Err(classify(status, &error_type, message));
    }
    for warning in &api.warnings {
        tracing::warn!(warning = %warning, "backend warning");
    }

    let data = api
        .data
        .ok_or_else(|| Error::MalformedResponse("success response without data".to_string()))?;
    if data.result_type != "matrix" {
        return Err(Error::MalformedResponse(format!(
            "expected matrix result, got '{}'",
            data.result_type
        )));
    }

    data.result
        .into_iter()
        .map(|r| {
            let samples = r
                .values
                .into_iter()
                .map(|(ts, raw)| {
                    #[allow(clippy::cast_possible_truncation)]
                    let millis = (ts * 1000.0).round() as i64;
                    let timestamp = DateTime::from_timestamp_millis(millis).ok_or_else(|| {
                        Error::MalformedResponse(format!("timestamp {ts} out of range"))
                    })?;
                    let value = raw.parse::<f64>().map_err(|_| {
                        Error::MalformedResponse(format!("sample value '{raw}' is not a number"))
                    })?;
                    Ok(Sample::new(timestamp, value))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(RawSeries::new(r.metric, samples))
        })
        .collect()
}

fn classify(status: StatusCode, error_type: &str, message: String) -> Error {
    match error_type {
        "bad_data" | "execution" => Error::InvalidQuery {
            key: String::new(),
            message: format!("{error_type}: {message}"),
        },
        "timeout" | "canceled" | "unavailable" | "internal" => {
            Error::Transport(format!("{error_type}: {message}"))
        }
        _ if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY => {
            Error::InvalidQuery {
                key: String::new(),
                message,
            }
        }
        _ if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS => {
            Error::Transport(format!("status {status}: {message}"))
        }
        _ if status.is_client_error() => {
            Error::Config(format!("backend refused request ({status}): {message}"))
        }
        _ => Error::MalformedResponse(format!("{error_type}: {message}")),
    }
}

fn truncate(body: &str) -> &str {
    let end = body
        .char_indices()
        .nth(200)
        .map_or(body.len(), |(i, _)| i);
    &body[..end]
}
