//! Run Observer pipeline - client-side real-time data layer
//!
//! Live trace streaming with reconnect and fallback, a versioned offline
//! resource cache, hover prefetch, polling for runs without a stream and a
//! computation offload worker. Platform-neutral: browser bindings live in
//! `run-observer-ui`, native backends are compiled in here.

pub mod compute;
pub mod config;
pub mod error;
pub mod polling;
pub mod prefetch;
pub mod resource_cache;
pub mod runtime;
pub mod sse;
pub mod stream;
pub mod trace_log;
pub mod transport;
pub mod worker;

#[cfg(not(target_arch = "wasm32"))]
pub mod http;
#[cfg(not(target_arch = "wasm32"))]
pub mod telemetry;

pub use config::PipelineConfig;
pub use error::{ErrorClass, PipelineError};
pub use polling::PollingFallback;
pub use prefetch::{PrefetchCache, PrefetchData, PrefetchKind};
pub use resource_cache::ResourceCache;
pub use runtime::{Runtime, SharedRuntime};
pub use stream::{SessionHandle, SessionStatus, StreamManager, TraceStreamState};
pub use trace_log::TraceLog;
pub use worker::WorkerClient;
