//! Scripted transports shared by the integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::channel::mpsc;
use futures::stream::{self, LocalBoxStream, StreamExt};
use run_pipeline::transport::{RunApi, StreamSignal, TraceStreamSource};
use run_pipeline::{PipelineError, TraceStreamState};
use shared_types::{AgentRef, FlatMetric, RunDetail, RunStatus, TraceRecord};

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_770_000_000 + secs, 0).unwrap()
}

pub fn trace(from: &str, to: &str, content: &str, secs: i64) -> TraceRecord {
    TraceRecord {
        from: AgentRef::new(from),
        to: AgentRef::new(to),
        content: content.to_string(),
        created_at: at(secs),
        is_system_trace: false,
    }
}

pub fn message(record: &TraceRecord) -> StreamSignal {
    StreamSignal::Message(serde_json::to_string(record).unwrap())
}

pub fn done() -> StreamSignal {
    StreamSignal::Message("[DONE]".to_string())
}

pub fn run(id: &str, status: RunStatus, summary: Option<serde_json::Value>) -> RunDetail {
    RunDetail {
        id: id.to_string(),
        name: None,
        status,
        summary,
        created_at: None,
        updated_at: None,
    }
}

/// Advance paused time and let spawned tasks run.
pub async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// Stream source
// ============================================================================

pub enum Connection {
    /// Emit the signals, then either stay open or end.
    Script {
        signals: Vec<StreamSignal>,
        stay_open: bool,
    },
    /// Signals pushed by the test through the matching sender.
    Channel(mpsc::UnboundedReceiver<StreamSignal>),
    /// `open` itself fails.
    Refuse(String),
}

impl Connection {
    pub fn open_with(signals: Vec<StreamSignal>) -> Self {
        Self::Script {
            signals,
            stay_open: true,
        }
    }

    pub fn ending_with(signals: Vec<StreamSignal>) -> Self {
        Self::Script {
            signals,
            stay_open: false,
        }
    }

    pub fn channel() -> (mpsc::UnboundedSender<StreamSignal>, Self) {
        let (sender, receiver) = mpsc::unbounded();
        (sender, Self::Channel(receiver))
    }
}

/// Hands out queued connections in order; refuses once the queue is empty.
#[derive(Default)]
pub struct ScriptedSource {
    connections: RefCell<VecDeque<Connection>>,
    opens: RefCell<Vec<String>>,
}

impl ScriptedSource {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn push(&self, connection: Connection) {
        self.connections.borrow_mut().push_back(connection);
    }

    pub fn open_count(&self) -> usize {
        self.opens.borrow().len()
    }
}

#[async_trait(?Send)]
impl TraceStreamSource for ScriptedSource {
    async fn open(
        &self,
        run_id: &str,
    ) -> Result<LocalBoxStream<'static, StreamSignal>, PipelineError> {
        self.opens.borrow_mut().push(run_id.to_string());
        let next = self.connections.borrow_mut().pop_front();
        match next {
            None => Err(PipelineError::Transport("connection refused".to_string())),
            Some(Connection::Refuse(reason)) => Err(PipelineError::Transport(reason)),
            Some(Connection::Channel(receiver)) => Ok(receiver.boxed_local()),
            Some(Connection::Script { signals, stay_open }) => {
                let scripted = stream::iter(signals);
                if stay_open {
                    Ok(scripted.chain(stream::pending()).boxed_local())
                } else {
                    Ok(scripted.boxed_local())
                }
            }
        }
    }
}

// ============================================================================
// One-shot API
// ============================================================================

/// In-memory backend. Run responses are consumed in order; the last one is
/// repeated.
#[derive(Default)]
pub struct FakeApi {
    runs: RefCell<HashMap<String, VecDeque<Result<RunDetail, PipelineError>>>>,
    traces: RefCell<HashMap<String, Result<Vec<TraceRecord>, PipelineError>>>,
    metrics: RefCell<HashMap<String, Result<Vec<FlatMetric>, PipelineError>>>,
    calls: RefCell<HashMap<(&'static str, String), usize>>,
    latency: RefCell<Option<Duration>>,
}

impl FakeApi {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn with_latency(&self, latency: Duration) {
        *self.latency.borrow_mut() = Some(latency);
    }

    pub fn push_run(&self, id: &str, response: Result<RunDetail, PipelineError>) {
        self.runs
            .borrow_mut()
            .entry(id.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn set_traces(&self, id: &str, response: Result<Vec<TraceRecord>, PipelineError>) {
        self.traces.borrow_mut().insert(id.to_string(), response);
    }

    pub fn set_metrics(&self, id: &str, response: Result<Vec<FlatMetric>, PipelineError>) {
        self.metrics.borrow_mut().insert(id.to_string(), response);
    }

    pub fn calls(&self, endpoint: &'static str, id: &str) -> usize {
        self.calls
            .borrow()
            .get(&(endpoint, id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    async fn record(&self, endpoint: &'static str, id: &str) {
        *self
            .calls
            .borrow_mut()
            .entry((endpoint, id.to_string()))
            .or_default() += 1;
        let latency = *self.latency.borrow();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

fn not_found(id: &str) -> PipelineError {
    PipelineError::Http {
        status: 404,
        message: format!("{id} not found"),
    }
}

#[async_trait(?Send)]
impl RunApi for FakeApi {
    async fn fetch_run(&self, run_id: &str) -> Result<RunDetail, PipelineError> {
        self.record("run", run_id).await;
        let mut runs = self.runs.borrow_mut();
        let queue = runs.get_mut(run_id).ok_or_else(|| not_found(run_id))?;
        if queue.len() > 1 {
            queue.pop_front().unwrap_or_else(|| Err(not_found(run_id)))
        } else {
            queue.front().cloned().unwrap_or_else(|| Err(not_found(run_id)))
        }
    }

    async fn fetch_traces(&self, run_id: &str) -> Result<Vec<TraceRecord>, PipelineError> {
        self.record("traces", run_id).await;
        self.traces
            .borrow()
            .get(run_id)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn fetch_metrics(&self, run_id: &str) -> Result<Vec<FlatMetric>, PipelineError> {
        self.record("metrics", run_id).await;
        self.metrics
            .borrow()
            .get(run_id)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

// ============================================================================
// View callback
// ============================================================================

#[derive(Clone, Default)]
pub struct Recorder {
    updates: Rc<RefCell<Vec<TraceStreamState>>>,
}

impl Recorder {
    pub fn callback(&self) -> impl Fn(TraceStreamState) + 'static {
        let updates = self.updates.clone();
        move |state| updates.borrow_mut().push(state)
    }

    pub fn count(&self) -> usize {
        self.updates.borrow().len()
    }

    pub fn last(&self) -> TraceStreamState {
        self.updates
            .borrow()
            .last()
            .cloned()
            .expect("no update published")
    }

    pub fn all(&self) -> Vec<TraceStreamState> {
        self.updates.borrow().clone()
    }
}
