//! Periodic re-fetch for runs without a live stream.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use shared_types::RunDetail;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PollingConfig;
use crate::runtime::{run_or_cancel, sleep_or_cancel, SharedRuntime};
use crate::transport::RunApi;

/// Polls run details until each run is terminal and complete.
///
/// A run still needs polling while its status is non-terminal, or while it is
/// `completed` but its summary has not been written yet.
pub struct PollingFallback {
    runtime: SharedRuntime,
    api: Rc<dyn RunApi>,
    settings: PollingConfig,
    scope: RefCell<CancellationToken>,
    active: Rc<RefCell<BTreeSet<String>>>,
}

impl PollingFallback {
    pub fn new(runtime: SharedRuntime, api: Rc<dyn RunApi>, settings: PollingConfig) -> Self {
        Self {
            runtime,
            api,
            settings,
            scope: RefCell::new(CancellationToken::new()),
            active: Rc::new(RefCell::new(BTreeSet::new())),
        }
    }

    /// Replace the watched set. Every timer from a previous call is cancelled
    /// before new ones start.
    pub fn watch<F>(&self, entities: &[RunDetail], on_update: F)
    where
        F: Fn(RunDetail) + 'static,
    {
        let token = CancellationToken::new();
        let previous = self.scope.replace(token.clone());
        previous.cancel();
        self.active.borrow_mut().clear();

        let on_update: Rc<dyn Fn(RunDetail)> = Rc::new(on_update);
        let pending: Vec<&RunDetail> = entities
            .iter()
            .filter(|entity| !entity.is_terminal_complete())
            .collect();
        if pending.is_empty() {
            return;
        }
        info!(count = pending.len(), "polling runs without live updates");

        for entity in pending {
            let run_id = entity.id.clone();
            if !self.active.borrow_mut().insert(run_id.clone()) {
                continue;
            }
            let task = poll_run(
                self.runtime.clone(),
                self.api.clone(),
                self.settings.clone(),
                token.child_token(),
                run_id,
                on_update.clone(),
                self.active.clone(),
            );
            self.runtime.spawn(Box::pin(task));
        }
    }

    /// Cancel every timer. Idempotent.
    pub fn stop(&self) {
        self.scope.borrow().cancel();
        self.active.borrow_mut().clear();
    }

    pub fn is_polling(&self, run_id: &str) -> bool {
        self.active.borrow().contains(run_id)
    }

    pub fn polled_ids(&self) -> Vec<String> {
        self.active.borrow().iter().cloned().collect()
    }
}

impl Drop for PollingFallback {
    fn drop(&mut self) {
        self.scope.borrow().cancel();
    }
}

async fn poll_run(
    runtime: SharedRuntime,
    api: Rc<dyn RunApi>,
    settings: PollingConfig,
    token: CancellationToken,
    run_id: String,
    on_update: Rc<dyn Fn(RunDetail)>,
    active: Rc<RefCell<BTreeSet<String>>>,
) {
    loop {
        if !sleep_or_cancel(runtime.as_ref(), settings.interval(), &token).await {
            return;
        }

        match run_or_cancel(api.fetch_run(&run_id), &token).await {
            None => return,
            Some(Ok(detail)) => {
                let finished = detail.is_terminal_complete();
                debug!(run_id = %run_id, status = detail.status.as_str(), "polled run");
                on_update(detail);
                if finished {
                    info!(run_id = %run_id, "run finished; polling stopped");
                    break;
                }
            }
            Some(Err(err)) => {
                warn!(run_id = %run_id, "polling fetch failed: {}", err);
            }
        }
    }

    // A cancelled task's id may already belong to a newer watch.
    if !token.is_cancelled() {
        active.borrow_mut().remove(&run_id);
    }
}
