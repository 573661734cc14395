use std::rc::Rc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::LocalBoxFuture;
use run_pipeline::{Runtime, SharedRuntime};

/// Browser event loop: `spawn_local` tasks and `setTimeout` sleeps.
#[derive(Debug, Default, Clone, Copy)]
pub struct WasmRuntime;

impl WasmRuntime {
    pub fn shared() -> SharedRuntime {
        Rc::new(Self)
    }
}

impl Runtime for WasmRuntime {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        wasm_bindgen_futures::spawn_local(task);
    }

    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        Box::pin(gloo_timers::future::sleep(duration))
    }

    fn now(&self) -> DateTime<Utc> {
        millis_to_datetime(js_sys::Date::now())
    }
}

/// `Date.now()` milliseconds to a UTC timestamp.
pub fn millis_to_datetime(millis: f64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis as i64).unwrap_or_default()
}
