//! Trace stream over the browser `EventSource`.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::stream::{LocalBoxStream, Stream, StreamExt};
use run_pipeline::transport::{trace_stream_path, StreamSignal, TraceStreamSource};
use run_pipeline::PipelineError;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{EventSource, MessageEvent};

/// Opens one `EventSource` per session against `api_base`.
#[derive(Debug, Clone)]
pub struct EventSourceTraceSource {
    api_base: String,
}

impl EventSourceTraceSource {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn stream_url(&self, run_id: &str) -> String {
        format!("{}{}", self.api_base, trace_stream_path(run_id))
    }
}

#[async_trait(?Send)]
impl TraceStreamSource for EventSourceTraceSource {
    async fn open(
        &self,
        run_id: &str,
    ) -> Result<LocalBoxStream<'static, StreamSignal>, PipelineError> {
        let url = self.stream_url(run_id);
        dioxus_logger::tracing::info!("Opening trace stream: {}", url);

        let (tx, rx) = mpsc::unbounded();
        let runtime = TraceEventSourceRuntime::connect(&url, tx)?;
        Ok(EventSourceStream {
            rx,
            _runtime: runtime,
        }
        .boxed_local())
    }
}

/// Owns the `EventSource` and its handlers. Dropping it detaches the
/// handlers and closes the connection.
struct TraceEventSourceRuntime {
    source: EventSource,
    _on_open: Closure<dyn FnMut(JsValue)>,
    _on_message: Closure<dyn FnMut(MessageEvent)>,
    _on_error: Closure<dyn FnMut(JsValue)>,
}

impl TraceEventSourceRuntime {
    fn connect(url: &str, tx: UnboundedSender<StreamSignal>) -> Result<Self, PipelineError> {
        let source = EventSource::new(url).map_err(|e| {
            PipelineError::Transport(format!("failed to create EventSource: {e:?}"))
        })?;

        let tx_open = tx.clone();
        let on_open = Closure::wrap(Box::new(move |_e: JsValue| {
            let _ = tx_open.unbounded_send(StreamSignal::Opened);
        }) as Box<dyn FnMut(JsValue)>);
        source.set_onopen(Some(on_open.as_ref().unchecked_ref()));

        let tx_message = tx.clone();
        let on_message = Closure::wrap(Box::new(move |e: MessageEvent| {
            if let Some(text) = e.data().as_string() {
                let _ = tx_message.unbounded_send(StreamSignal::Message(text));
            }
        }) as Box<dyn FnMut(MessageEvent)>);
        source.set_onmessage(Some(on_message.as_ref().unchecked_ref()));

        // EventSource would reconnect on its own; the session owns retries,
        // so every error ends this connection.
        let source_for_error = source.clone();
        let on_error = Closure::wrap(Box::new(move |_e: JsValue| {
            let reason = error_reason(source_for_error.ready_state());
            dioxus_logger::tracing::warn!("Trace stream error: {}", reason);
            source_for_error.close();
            let _ = tx.unbounded_send(StreamSignal::Failed(reason));
            tx.close_channel();
        }) as Box<dyn FnMut(JsValue)>);
        source.set_onerror(Some(on_error.as_ref().unchecked_ref()));

        Ok(Self {
            source,
            _on_open: on_open,
            _on_message: on_message,
            _on_error: on_error,
        })
    }
}

impl Drop for TraceEventSourceRuntime {
    fn drop(&mut self) {
        self.source.set_onopen(None);
        self.source.set_onmessage(None);
        self.source.set_onerror(None);
        self.source.close();
    }
}

struct EventSourceStream {
    rx: UnboundedReceiver<StreamSignal>,
    _runtime: TraceEventSourceRuntime,
}

impl Stream for EventSourceStream {
    type Item = StreamSignal;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_next_unpin(cx)
    }
}

/// `readyState` values: 0 connecting, 1 open, 2 closed.
pub fn error_reason(ready_state: u16) -> String {
    match ready_state {
        0 => "event stream reconnecting".to_string(),
        1 => "event stream error".to_string(),
        _ => "event stream closed".to_string(),
    }
}
