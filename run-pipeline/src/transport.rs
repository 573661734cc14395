//! Seams to the backend HTTP/SSE API.

use async_trait::async_trait;
use futures::stream::LocalBoxStream;
use shared_types::{FlatMetric, RunDetail, TraceRecord};

use crate::error::PipelineError;

/// One-shot endpoints used for fallback, polling and prefetch.
#[async_trait(?Send)]
pub trait RunApi {
    /// `GET /runs/{id}`
    async fn fetch_run(&self, run_id: &str) -> Result<RunDetail, PipelineError>;

    /// `GET /runs/{id}/traces`
    async fn fetch_traces(&self, run_id: &str) -> Result<Vec<TraceRecord>, PipelineError>;

    /// `GET /runs/{id}/metrics`, reshaped into a flat kind-tagged list.
    async fn fetch_metrics(&self, run_id: &str) -> Result<Vec<FlatMetric>, PipelineError>;
}

/// Event surfaced by an open push connection.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamSignal {
    Opened,
    /// Raw payload of one message, either trace JSON or the `[DONE]` sentinel.
    Message(String),
    /// Transport-level failure; the connection is unusable afterwards.
    Failed(String),
}

/// Opens `GET /runs/{id}/traces?stream=true`.
///
/// Dropping the returned stream closes the underlying connection. A stream
/// that ends without a `[DONE]` message is treated as a dropped connection.
#[async_trait(?Send)]
pub trait TraceStreamSource {
    async fn open(
        &self,
        run_id: &str,
    ) -> Result<LocalBoxStream<'static, StreamSignal>, PipelineError>;
}

/// Turn a non-success response into an error, preferring the body's
/// `error` or `message` field.
pub fn http_error(status: u16, body: &str) -> PipelineError {
    let body = body.trim();
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            json.get("error")
                .or_else(|| json.get("message"))
                .and_then(|value| value.as_str())
                .map(ToString::to_string)
        })
        .unwrap_or_else(|| {
            if body.is_empty() {
                "empty response body".to_string()
            } else {
                body.to_string()
            }
        });
    PipelineError::Http { status, message }
}

pub fn run_path(run_id: &str) -> String {
    format!("/runs/{run_id}")
}

pub fn traces_path(run_id: &str) -> String {
    format!("/runs/{run_id}/traces")
}

pub fn trace_stream_path(run_id: &str) -> String {
    format!("/runs/{run_id}/traces?stream=true")
}

pub fn metrics_path(run_id: &str) -> String {
    format!("/runs/{run_id}/metrics")
}
