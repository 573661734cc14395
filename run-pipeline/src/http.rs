//! Native HTTP transport over reqwest.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, LocalBoxStream, StreamExt};
use serde::de::DeserializeOwned;
use shared_types::{FlatMetric, RunDetail, RunMetricsResponse, TraceRecord, TracesResponse};
use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::sse::SseDecoder;
use crate::transport::{
    http_error, metrics_path, run_path, trace_stream_path, traces_path, RunApi, StreamSignal,
    TraceStreamSource,
};

/// `RunApi` and `TraceStreamSource` against a live backend.
#[derive(Clone)]
pub struct HttpRunApi {
    client: reqwest::Client,
    api_base: String,
}

impl HttpRunApi {
    pub fn new(api_base: impl Into<String>) -> Result<Self, PipelineError> {
        // No overall timeout: trace streams stay open for the whole run.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PipelineError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        Self::new(config.api_base.clone())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn send(&self, path: &str, accept: &str) -> Result<reqwest::Response, PipelineError> {
        let url = self.url(path);
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, accept)
            .send()
            .await
            .map_err(|e| PipelineError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(http_error(status.as_u16(), &body));
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, PipelineError> {
        let body = self
            .send(path, "application/json")
            .await?
            .text()
            .await
            .map_err(|e| PipelineError::Transport(e.to_string()))?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait(?Send)]
impl RunApi for HttpRunApi {
    async fn fetch_run(&self, run_id: &str) -> Result<RunDetail, PipelineError> {
        self.get_json(&run_path(run_id)).await
    }

    async fn fetch_traces(&self, run_id: &str) -> Result<Vec<TraceRecord>, PipelineError> {
        let response: TracesResponse = self.get_json(&traces_path(run_id)).await?;
        Ok(response.into_records())
    }

    async fn fetch_metrics(&self, run_id: &str) -> Result<Vec<FlatMetric>, PipelineError> {
        let response: RunMetricsResponse = self.get_json(&metrics_path(run_id)).await?;
        Ok(response.flatten())
    }
}

#[async_trait(?Send)]
impl TraceStreamSource for HttpRunApi {
    async fn open(
        &self,
        run_id: &str,
    ) -> Result<LocalBoxStream<'static, StreamSignal>, PipelineError> {
        let response = self
            .send(&trace_stream_path(run_id), "text/event-stream")
            .await?;
        let body = Box::pin(response.bytes_stream());

        let events = stream::unfold(Some((body, SseDecoder::new())), |state| async move {
            let Some((mut body, mut decoder)) = state else {
                return None;
            };
            match body.next().await {
                Some(Ok(chunk)) => {
                    let signals: Vec<StreamSignal> = decoder
                        .push(&chunk)
                        .into_iter()
                        .map(StreamSignal::Message)
                        .collect();
                    Some((signals, Some((body, decoder))))
                }
                Some(Err(e)) => Some((
                    vec![StreamSignal::Failed(format!("stream read failed: {e}"))],
                    None,
                )),
                None => {
                    let tail: Vec<StreamSignal> =
                        decoder.finish().map(StreamSignal::Message).into_iter().collect();
                    Some((tail, None))
                }
            }
        })
        .flat_map(stream::iter);

        Ok(stream::once(async { StreamSignal::Opened })
            .chain(events)
            .boxed_local())
    }
}
