//! Browser side of the Run Observer pipeline: gloo-net API client,
//! `EventSource` trace streams, service worker and web worker entry points,
//! and the Dioxus hooks views use to subscribe.

pub mod api;
pub mod hooks;
pub mod runtime;
pub mod service_worker;
pub mod stream;
pub mod worker;

use std::sync::Once;

use dioxus_logger::tracing::Level;

pub use api::{api_base, GlooRunApi};
pub use hooks::{
    use_compute_worker, use_pipeline, use_pipeline_provider, use_prefetch, use_run_polling,
    use_trace_stream, PipelineContext,
};
pub use runtime::WasmRuntime;
pub use stream::EventSourceTraceSource;

/// Console logging for the page and both worker scopes. Safe to call more
/// than once.
pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        wasm_logger::init(wasm_logger::Config::default());
        dioxus_logger::init(Level::INFO).ok();
    });
}
