//! Web Worker backend for the computation offload worker.
//!
//! The same wasm bundle runs on both sides: the page creates the worker and
//! talks to it through [`spawn_web_worker`], the worker script calls
//! [`start_compute_worker`].

use std::cell::RefCell;
use std::rc::Rc;

use run_pipeline::worker::{handle_message, WeakWorkerClient, WorkerClient, WorkerTransport};
use run_pipeline::PipelineError;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{DedicatedWorkerGlobalScope, MessageEvent, Worker, WorkerOptions, WorkerType};

#[derive(Default)]
struct WorkerHandlers {
    on_message: Option<Closure<dyn FnMut(MessageEvent)>>,
    on_error: Option<Closure<dyn FnMut(JsValue)>>,
}

/// Posts request envelopes to a dedicated `Worker`.
struct WebWorkerTransport {
    worker: Worker,
    handlers: Rc<RefCell<WorkerHandlers>>,
}

impl WorkerTransport for WebWorkerTransport {
    fn post(&self, message: String) -> Result<(), PipelineError> {
        self.worker
            .post_message(&JsValue::from_str(&message))
            .map_err(|e| PipelineError::Worker(format!("postMessage failed: {e:?}")))
    }

    fn terminate(&self) {
        self.worker.set_onmessage(None);
        self.worker.set_onerror(None);
        self.worker.terminate();
        let handlers = std::mem::take(&mut *self.handlers.borrow_mut());
        // The error handler may be the caller; release the closures later.
        wasm_bindgen_futures::spawn_local(async move {
            drop(handlers);
        });
    }
}

/// Start `script_url` as a module worker and return a client for it.
pub fn spawn_web_worker(script_url: &str) -> Result<WorkerClient, PipelineError> {
    let options = WorkerOptions::new();
    options.set_type(WorkerType::Module);
    let worker = Worker::new_with_options(script_url, &options)
        .map_err(|e| PipelineError::Worker(format!("failed to start worker: {e:?}")))?;

    let handlers = Rc::new(RefCell::new(WorkerHandlers::default()));
    let client = WorkerClient::new(Box::new(WebWorkerTransport {
        worker: worker.clone(),
        handlers: handlers.clone(),
    }));

    let weak = client.downgrade();
    let on_message = Closure::wrap(Box::new(move |e: MessageEvent| {
        deliver_message(&weak, &e.data());
    }) as Box<dyn FnMut(MessageEvent)>);
    worker.set_onmessage(Some(on_message.as_ref().unchecked_ref()));

    let weak = client.downgrade();
    let on_error = Closure::wrap(Box::new(move |e: JsValue| {
        dioxus_logger::tracing::error!("Compute worker error: {:?}", e);
        if let Some(client) = weak.upgrade() {
            client.terminate();
        }
    }) as Box<dyn FnMut(JsValue)>);
    worker.set_onerror(Some(on_error.as_ref().unchecked_ref()));

    let mut slots = handlers.borrow_mut();
    slots.on_message = Some(on_message);
    slots.on_error = Some(on_error);
    drop(slots);

    dioxus_logger::tracing::info!("Compute worker started: {}", script_url);
    Ok(client)
}

fn deliver_message(client: &WeakWorkerClient, data: &JsValue) {
    let Some(client) = client.upgrade() else {
        return;
    };
    match data.as_string() {
        Some(raw) => client.deliver(&raw),
        None => dioxus_logger::tracing::warn!("Ignoring non-text worker message"),
    }
}

/// Worker-side entry: answer every request envelope with a response envelope.
#[wasm_bindgen]
pub fn start_compute_worker() -> Result<(), JsValue> {
    crate::init_logging();

    let scope = js_sys::global().dyn_into::<DedicatedWorkerGlobalScope>()?;
    let reply_scope = scope.clone();
    let on_message = Closure::wrap(Box::new(move |e: MessageEvent| {
        let Some(raw) = e.data().as_string() else {
            dioxus_logger::tracing::warn!("Ignoring non-text request");
            return;
        };
        let reply = handle_message(&raw);
        if let Err(err) = reply_scope.post_message(&JsValue::from_str(&reply)) {
            dioxus_logger::tracing::error!("Failed to post worker reply: {:?}", err);
        }
    }) as Box<dyn FnMut(MessageEvent)>);
    scope.set_onmessage(Some(on_message.as_ref().unchecked_ref()));
    on_message.forget();

    Ok(())
}
