//! Offload worker protocol: the worker-side message handler and the
//! caller-side correlating client.

#[cfg(not(target_arch = "wasm32"))]
mod thread;

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use futures::channel::oneshot;
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared_types::{
    CorrelationId, EnrichedMetric, FilterPayload, FilterPredicate, FlatMetric, ParseJsonPayload,
    ProcessMetricsPayload, SortKey, SortPayload, Statistics, StatisticsPayload, WorkerOp,
    WorkerRequest, WorkerResponse,
};
use tracing::{debug, warn};

#[cfg(not(target_arch = "wasm32"))]
pub use thread::ThreadWorker;

use crate::compute;
use crate::error::PipelineError;

// ============================================================================
// Worker side
// ============================================================================

/// Handle one raw request and return the raw response. Never panics.
pub fn handle_message(raw: &str) -> String {
    let response = respond(raw);
    serde_json::to_string(&response).unwrap_or_else(|err| {
        format!(r#"{{"type":"ERROR","error":"failed to encode response: {err}","id":null}}"#)
    })
}

pub fn respond(raw: &str) -> WorkerResponse {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => return WorkerResponse::failure(None, format!("Invalid message: {err}")),
    };

    // Keep the id when only the payload is bad, so the caller is not left
    // waiting.
    let id = value
        .get("id")
        .filter(|id| !id.is_null())
        .and_then(|id| serde_json::from_value::<CorrelationId>(id.clone()).ok());

    let request = match WorkerRequest::from_value(value) {
        Ok(request) => request,
        Err(err) => return WorkerResponse::failure(id, format!("Invalid request: {err}")),
    };

    let kind = request.op.kind();
    let id = request.id;
    let op = request.op;
    match panic::catch_unwind(AssertUnwindSafe(move || compute::execute(op))) {
        Ok(Ok(data)) => WorkerResponse::success(kind, id, data),
        Ok(Err(err)) => WorkerResponse::failure(id, err.to_string()),
        Err(payload) => WorkerResponse::failure(id, panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("Worker operation panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("Worker operation panicked: {message}")
    } else {
        "Worker operation panicked".to_string()
    }
}

// ============================================================================
// Caller side
// ============================================================================

/// Carries raw request messages to the worker.
pub trait WorkerTransport {
    fn post(&self, message: String) -> Result<(), PipelineError>;

    /// Stop the worker. Called at most once.
    fn terminate(&self);
}

type Reply = Result<WorkerResponse, PipelineError>;

struct ClientInner {
    transport: Box<dyn WorkerTransport>,
    pending: RefCell<HashMap<CorrelationId, oneshot::Sender<Reply>>>,
    terminated: Cell<bool>,
}

impl ClientInner {
    fn terminate(&self) {
        if self.terminated.replace(true) {
            return;
        }
        self.transport.terminate();
        let pending: Vec<_> = self.pending.borrow_mut().drain().collect();
        if !pending.is_empty() {
            warn!(count = pending.len(), "worker terminated with requests in flight");
        }
        for (_, sender) in pending {
            let _ = sender.send(Err(PipelineError::WorkerUnavailable));
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Correlating client for the offload worker. Clones share one worker.
///
/// Responses are matched by id, so they may arrive in any order. Feed every
/// raw message coming back from the worker into [`WorkerClient::deliver`].
#[derive(Clone)]
pub struct WorkerClient {
    inner: Rc<ClientInner>,
}

/// Non-owning handle used by response pumps.
#[derive(Clone)]
pub struct WeakWorkerClient {
    inner: Weak<ClientInner>,
}

impl WeakWorkerClient {
    pub fn upgrade(&self) -> Option<WorkerClient> {
        self.inner.upgrade().map(|inner| WorkerClient { inner })
    }
}

impl WorkerClient {
    pub fn new(transport: Box<dyn WorkerTransport>) -> Self {
        Self {
            inner: Rc::new(ClientInner {
                transport,
                pending: RefCell::new(HashMap::new()),
                terminated: Cell::new(false),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakWorkerClient {
        WeakWorkerClient {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.get()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.borrow().len()
    }

    /// Send `op` under a fresh random id and wait for its result.
    pub async fn request(&self, op: WorkerOp) -> Result<Value, PipelineError> {
        let id = CorrelationId::new(uuid::Uuid::new_v4().to_string());
        self.request_with_id(id, op).await
    }

    /// Fails immediately if a request with the same id is still outstanding.
    pub async fn request_with_id(
        &self,
        id: CorrelationId,
        op: WorkerOp,
    ) -> Result<Value, PipelineError> {
        let receiver = self.submit(id, op)?;
        let response = match receiver.await {
            Ok(reply) => reply?,
            Err(oneshot::Canceled) => return Err(PipelineError::WorkerUnavailable),
        };

        if response.is_error() {
            return Err(PipelineError::Worker(
                response
                    .error
                    .unwrap_or_else(|| "unknown worker error".to_string()),
            ));
        }
        Ok(response.data.unwrap_or(Value::Null))
    }

    fn submit(
        &self,
        id: CorrelationId,
        op: WorkerOp,
    ) -> Result<oneshot::Receiver<Reply>, PipelineError> {
        if self.is_terminated() {
            return Err(PipelineError::WorkerUnavailable);
        }
        if self.inner.pending.borrow().contains_key(&id) {
            return Err(PipelineError::DuplicateCorrelationId(id.to_string()));
        }

        let message = WorkerRequest {
            id: Some(id.clone()),
            op,
        }
        .to_json()?;

        let (sender, receiver) = oneshot::channel();
        self.inner.pending.borrow_mut().insert(id.clone(), sender);
        if let Err(err) = self.inner.transport.post(message) {
            self.inner.pending.borrow_mut().remove(&id);
            return Err(err);
        }
        Ok(receiver)
    }

    /// Route one raw worker response to its waiting request.
    pub fn deliver(&self, raw: &str) {
        let response: WorkerResponse = match serde_json::from_str(raw) {
            Ok(response) => response,
            Err(err) => {
                warn!("discarding malformed worker response: {}", err);
                return;
            }
        };
        let Some(id) = response.id.clone() else {
            warn!(
                "worker reported an uncorrelated error: {}",
                response.error.as_deref().unwrap_or("unknown")
            );
            return;
        };

        let sender = self.inner.pending.borrow_mut().remove(&id);
        match sender {
            Some(sender) => {
                let _ = sender.send(Ok(response));
            }
            None => debug!(id = %id, "worker response for unknown request"),
        }
    }

    /// Stop the worker and fail every pending request. Idempotent.
    pub fn terminate(&self) {
        self.inner.terminate();
    }

    pub async fn process_metrics(
        &self,
        metrics: Vec<FlatMetric>,
    ) -> Result<Vec<EnrichedMetric>, PipelineError> {
        self.typed(WorkerOp::ProcessMetrics(ProcessMetricsPayload { metrics }))
            .await
    }

    pub async fn parse_json(&self, text: impl Into<String>) -> Result<Value, PipelineError> {
        self.request(WorkerOp::ParseJson(ParseJsonPayload { text: text.into() }))
            .await
    }

    pub async fn sort_data(
        &self,
        items: Vec<Value>,
        keys: Vec<SortKey>,
    ) -> Result<Vec<Value>, PipelineError> {
        self.typed(WorkerOp::SortData(SortPayload { items, keys })).await
    }

    pub async fn filter_data(
        &self,
        items: Vec<Value>,
        filters: Vec<FilterPredicate>,
    ) -> Result<Vec<Value>, PipelineError> {
        self.typed(WorkerOp::FilterData(FilterPayload { items, filters }))
            .await
    }

    pub async fn calculate_statistics(
        &self,
        items: Vec<Value>,
        numeric_keys: Vec<String>,
    ) -> Result<BTreeMap<String, Statistics>, PipelineError> {
        self.typed(WorkerOp::CalculateStatistics(StatisticsPayload {
            items,
            numeric_keys,
        }))
        .await
    }

    async fn typed<T: DeserializeOwned>(&self, op: WorkerOp) -> Result<T, PipelineError> {
        let data = self.request(op).await?;
        Ok(serde_json::from_value(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_statistics_round_trip_through_handler() {
        let raw = json!({
            "type": "CALCULATE_STATISTICS",
            "data": {"items": [{"v": 1}, {"v": 2}, {"v": 3}, {"v": 4}], "numericKeys": ["v"]},
            "id": "stats-1"
        })
        .to_string();
        let response: WorkerResponse = serde_json::from_str(&handle_message(&raw)).unwrap();
        assert_eq!(response.id, Some(CorrelationId::new("stats-1")));
        assert!(!response.is_error());
        let data = response.data.unwrap();
        assert_eq!(data["v"]["mean"], 2.5);
        assert_eq!(data["v"]["median"], 2.5);
        assert_eq!(data["v"]["min"], 1.0);
        assert_eq!(data["v"]["max"], 4.0);
    }

    #[test]
    fn test_unparseable_envelope_has_null_id() {
        let raw = handle_message("{not json");
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["type"], "ERROR");
        assert!(value["id"].is_null());
    }

    #[test]
    fn test_op_failure_keeps_request_id() {
        let raw = json!({"type": "PARSE_JSON", "data": {"text": "{oops"}, "id": 11}).to_string();
        let response = respond(&raw);
        assert!(response.is_error());
        assert_eq!(response.id, Some(CorrelationId::new("11")));
        assert!(response.error.unwrap().starts_with("Invalid JSON"));

        let unknown = json!({"type": "EXPLODE", "data": {}, "id": "x"}).to_string();
        let response = respond(&unknown);
        assert!(response.is_error());
        assert_eq!(response.id, Some(CorrelationId::new("x")));
    }
}
