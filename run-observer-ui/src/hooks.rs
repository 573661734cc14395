//! Dioxus hooks that own the pipeline's view state.
//!
//! Each view gets its own `StreamManager` and `PollingFallback`, torn down
//! with the component. The prefetch cache and compute worker are shared
//! through [`PipelineContext`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use dioxus::prelude::*;
use run_pipeline::transport::{RunApi, TraceStreamSource};
use run_pipeline::{
    PipelineConfig, PollingFallback, PrefetchCache, SessionHandle, SessionStatus, SharedRuntime,
    StreamManager, TraceStreamState, WorkerClient,
};
use shared_types::RunDetail;

use crate::api::GlooRunApi;
use crate::runtime::WasmRuntime;
use crate::stream::EventSourceTraceSource;
use crate::worker::spawn_web_worker;

/// Services shared by every view under the provider.
#[derive(Clone)]
pub struct PipelineContext {
    pub config: Rc<PipelineConfig>,
    pub runtime: SharedRuntime,
    pub api: Rc<dyn RunApi>,
    pub source: Rc<dyn TraceStreamSource>,
    pub prefetch: PrefetchCache,
    pub worker: Option<WorkerClient>,
}

impl PipelineContext {
    /// Browser services. Without `worker_script`, or when the worker cannot
    /// start, computations run on the page.
    pub fn browser(config: PipelineConfig, worker_script: Option<&str>) -> Self {
        let runtime = WasmRuntime::shared();
        let api = GlooRunApi::for_page(&config.api_base);
        let source = EventSourceTraceSource::new(api.url(""));
        let api: Rc<dyn RunApi> = Rc::new(api);

        let prefetch = PrefetchCache::new(runtime.clone(), api.clone(), config.prefetch.clone());
        prefetch.init();

        let worker = worker_script.and_then(|script| match spawn_web_worker(script) {
            Ok(client) => Some(client),
            Err(e) => {
                dioxus_logger::tracing::warn!("Compute worker unavailable: {}", e);
                None
            }
        });

        Self {
            config: Rc::new(config),
            runtime,
            api,
            source: Rc::new(source),
            prefetch,
            worker,
        }
    }

    fn shutdown(&self) {
        self.prefetch.dispose();
        if let Some(worker) = &self.worker {
            worker.terminate();
        }
    }
}

/// Provide a [`PipelineContext`] to the subtree, built once.
pub fn use_pipeline_provider(build: impl FnOnce() -> PipelineContext) -> PipelineContext {
    let context = use_context_provider(build);
    let teardown = context.clone();
    use_drop(move || teardown.shutdown());
    context
}

pub fn use_pipeline() -> PipelineContext {
    use_context::<PipelineContext>()
}

/// Hover prefetch handle; call `schedule(run_id)` from pointer handlers.
pub fn use_prefetch() -> PrefetchCache {
    use_pipeline().prefetch
}

pub fn use_compute_worker() -> Option<WorkerClient> {
    use_pipeline().worker
}

pub fn initial_stream_state(entity_id: &str) -> TraceStreamState {
    TraceStreamState {
        entity_id: entity_id.to_string(),
        traces: Vec::new(),
        status: SessionStatus::Connecting,
        error: None,
        complete: false,
        reconnecting: false,
        retry_count: 0,
        fallback_used: false,
    }
}

/// Live traces for `entity_id`. Changing the id closes the previous session
/// and opens a new one.
pub fn use_trace_stream(entity_id: &str) -> Signal<TraceStreamState> {
    let context = use_pipeline();
    let state = use_signal(|| initial_stream_state(entity_id));
    let streams = use_hook(|| {
        Rc::new(StreamManager::new(
            context.runtime.clone(),
            context.source.clone(),
            context.api.clone(),
            context.config.stream.clone(),
        ))
    });
    let current = use_hook(|| Rc::new(RefCell::new(None::<SessionHandle>)));

    let reopen = current
        .borrow()
        .as_ref()
        .map_or(true, |handle| handle.entity_id() != entity_id);
    if reopen {
        let previous = current.borrow_mut().take();
        if let Some(previous) = previous {
            streams.close(previous.entity_id());
        }
        let handle = streams.open(entity_id, move |snapshot| {
            let mut state = state;
            if let Ok(mut slot) = state.try_write() {
                *slot = snapshot;
            };
        });
        *current.borrow_mut() = Some(handle);
    }

    use_drop(move || streams.close_all());
    state
}

/// `runs` with the latest polled detail substituted for every run that has
/// not yet reached a terminal and complete state.
pub fn use_run_polling(runs: &[RunDetail]) -> Vec<RunDetail> {
    let context = use_pipeline();
    let updates = use_signal(HashMap::<String, RunDetail>::new);
    let polling = use_hook(|| {
        Rc::new(PollingFallback::new(
            context.runtime.clone(),
            context.api.clone(),
            context.config.polling.clone(),
        ))
    });
    let watched = use_hook(|| Rc::new(RefCell::new(None::<Vec<String>>)));

    let ids: Vec<String> = runs.iter().map(|run| run.id.clone()).collect();
    if watched.borrow().as_ref() != Some(&ids) {
        *watched.borrow_mut() = Some(ids);
        polling.watch(runs, move |detail| {
            let mut updates = updates;
            if let Ok(mut map) = updates.try_write() {
                map.insert(detail.id.clone(), detail);
            };
        });
    }

    let stop = polling.clone();
    use_drop(move || stop.stop());

    let latest = updates.read();
    merge_polled(runs, &latest)
}

pub fn merge_polled(runs: &[RunDetail], updates: &HashMap<String, RunDetail>) -> Vec<RunDetail> {
    runs.iter()
        .map(|run| updates.get(&run.id).cloned().unwrap_or_else(|| run.clone()))
        .collect()
}
