//! Single-threaded execution seam.
//!
//! Every component runs as cooperative tasks on one thread. The browser build
//! backs this with `wasm-bindgen-futures` and `gloo-timers`; native builds use
//! a tokio `LocalSet`, which also lets tests drive timers with paused time.

use std::rc::Rc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{self, Either, LocalBoxFuture};
use tokio_util::sync::CancellationToken;

pub trait Runtime {
    /// Run `task` on the current thread. Never blocks.
    fn spawn(&self, task: LocalBoxFuture<'static, ()>);

    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;

    fn now(&self) -> DateTime<Utc>;
}

pub type SharedRuntime = Rc<dyn Runtime>;

/// Sleep unless `token` fires first. Returns `false` when cancelled.
pub async fn sleep_or_cancel(
    runtime: &dyn Runtime,
    duration: Duration,
    token: &CancellationToken,
) -> bool {
    if token.is_cancelled() {
        return false;
    }
    let sleep = runtime.sleep(duration);
    let cancelled = Box::pin(token.cancelled());
    match future::select(sleep, cancelled).await {
        Either::Left(_) => !token.is_cancelled(),
        Either::Right(_) => false,
    }
}

/// Await `fut` unless `token` fires first.
pub async fn run_or_cancel<F>(fut: F, token: &CancellationToken) -> Option<F::Output>
where
    F: std::future::Future,
{
    if token.is_cancelled() {
        return None;
    }
    let fut = Box::pin(fut);
    let cancelled = Box::pin(token.cancelled());
    match future::select(fut, cancelled).await {
        Either::Left((output, _)) => Some(output),
        Either::Right(_) => None,
    }
}

/// Elapsed wall time between two runtime readings, never negative.
pub fn elapsed_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> Duration {
    (later - earlier).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(not(target_arch = "wasm32"))]
pub use native::TokioRuntime;

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use super::*;

    /// Runtime backed by the ambient tokio `LocalSet`.
    ///
    /// `now()` is anchored to tokio's clock so paused-time tests see TTLs
    /// expire as timers advance.
    pub struct TokioRuntime {
        anchor_wall: DateTime<Utc>,
        anchor_instant: tokio::time::Instant,
    }

    impl TokioRuntime {
        pub fn new() -> Self {
            Self {
                anchor_wall: Utc::now(),
                anchor_instant: tokio::time::Instant::now(),
            }
        }

        pub fn shared() -> SharedRuntime {
            Rc::new(Self::new())
        }
    }

    impl Default for TokioRuntime {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Runtime for TokioRuntime {
        fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
            tokio::task::spawn_local(task);
        }

        fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
            Box::pin(tokio::time::sleep(duration))
        }

        fn now(&self) -> DateTime<Utc> {
            let elapsed = chrono::Duration::from_std(self.anchor_instant.elapsed())
                .unwrap_or(chrono::Duration::zero());
            self.anchor_wall + elapsed
        }
    }
}
