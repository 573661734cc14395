use std::sync::OnceLock;

use async_trait::async_trait;
use gloo_net::http::Request;
use run_pipeline::transport::{http_error, metrics_path, run_path, traces_path, RunApi};
use run_pipeline::PipelineError;
use serde::de::DeserializeOwned;
use shared_types::{FlatMetric, RunDetail, RunMetricsResponse, TraceRecord, TracesResponse};

/// Pick the API base for the page's host.
/// - On localhost: the dev API server on port 8080
/// - Elsewhere: same origin
pub fn api_base_for_host(hostname: &str) -> &'static str {
    if hostname == "localhost" || hostname == "127.0.0.1" {
        "http://localhost:8080"
    } else {
        ""
    }
}

fn get_api_base() -> String {
    let hostname = web_sys::window()
        .and_then(|w| w.location().hostname().ok())
        .unwrap_or_default();
    api_base_for_host(&hostname).to_string()
}

static API_BASE_CACHE: OnceLock<String> = OnceLock::new();

/// API base URL, computed on first use.
pub fn api_base() -> &'static str {
    API_BASE_CACHE.get_or_init(get_api_base).as_str()
}

/// `RunApi` over `fetch` via gloo-net.
#[derive(Debug, Clone)]
pub struct GlooRunApi {
    api_base: String,
}

impl GlooRunApi {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Use `configured` when set, otherwise derive the base from the page host.
    pub fn for_page(configured: &str) -> Self {
        if configured.is_empty() {
            Self::new(api_base())
        } else {
            Self::new(configured)
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, PipelineError> {
        let url = self.url(path);
        dioxus_logger::tracing::debug!("GET {}", url);

        let response = Request::get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| PipelineError::Transport(e.to_string()))?;

        let body = response.text().await.unwrap_or_default();
        if !response.ok() {
            return Err(http_error(response.status(), &body));
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait(?Send)]
impl RunApi for GlooRunApi {
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
