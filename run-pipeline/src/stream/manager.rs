use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use futures::StreamExt;
use serde::Serialize;
use shared_types::TraceRecord;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::fsm::{transition, Effect, SessionEvent, SessionState, SessionStatus};
use crate::config::StreamConfig;
use crate::error::PipelineError;
use crate::runtime::{run_or_cancel, sleep_or_cancel, SharedRuntime};
use crate::sse::DONE_SENTINEL;
use crate::trace_log::TraceLog;
use crate::transport::{RunApi, StreamSignal, TraceStreamSource};

/// View-facing snapshot of one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceStreamState {
    pub entity_id: String,
    /// Newest first.
    pub traces: Vec<TraceRecord>,
    pub status: SessionStatus,
    pub error: Option<String>,
    pub complete: bool,
    /// Transport dropped and a reconnect is pending.
    pub reconnecting: bool,
    pub retry_count: u32,
    /// The one-shot fetch has contributed records.
    pub fallback_used: bool,
}

struct Session {
    entity_id: String,
    token: CancellationToken,
    state: RefCell<SessionState>,
    log: RefCell<TraceLog>,
    error: RefCell<Option<String>>,
    fallback_used: RefCell<bool>,
    on_update: Box<dyn Fn(TraceStreamState)>,
}

impl Session {
    fn dispatch(&self, event: SessionEvent) -> Vec<Effect> {
        let (next, effects) = {
            let current = self.state.borrow();
            transition(&current, event)
        };
        *self.state.borrow_mut() = next;
        effects
    }

    fn status(&self) -> SessionStatus {
        self.state.borrow().status
    }

    fn set_error(&self, message: Option<String>) {
        *self.error.borrow_mut() = message;
    }

    fn snapshot(&self) -> TraceStreamState {
        let state = self.state.borrow();
        TraceStreamState {
            entity_id: self.entity_id.clone(),
            traces: self.log.borrow().to_vec(),
            status: state.status,
            error: self.error.borrow().clone(),
            complete: state.status == SessionStatus::Complete,
            reconnecting: state.status == SessionStatus::Retrying,
            retry_count: state.retry_count,
            fallback_used: *self.fallback_used.borrow(),
        }
    }

    /// Push a snapshot to the view unless the session was torn down.
    fn publish(&self) {
        if self.token.is_cancelled() {
            return;
        }
        let snapshot = self.snapshot();
        (self.on_update)(snapshot);
    }
}

/// Handle to an open session. Cloning shares the same session.
#[derive(Clone)]
pub struct SessionHandle {
    session: Rc<Session>,
}

impl SessionHandle {
    pub fn entity_id(&self) -> &str {
        &self.session.entity_id
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    pub fn snapshot(&self) -> TraceStreamState {
        self.session.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.session.token.is_cancelled()
    }

    /// Close the session and release its connection and timers. Idempotent.
    pub fn close(&self) {
        if self.session.token.is_cancelled() {
            return;
        }
        self.session.dispatch(SessionEvent::CloseRequested);
        self.session.token.cancel();
        debug!(entity_id = %self.session.entity_id, "trace stream session closed");
    }
}

/// Owns the live stream sessions of one view.
///
/// At most one session per entity id is open; opening the same id again
/// closes the previous session first. Dropping the manager closes all of
/// them.
pub struct StreamManager {
    runtime: SharedRuntime,
    source: Rc<dyn TraceStreamSource>,
    api: Rc<dyn RunApi>,
    settings: StreamConfig,
    scope: CancellationToken,
    sessions: RefCell<HashMap<String, SessionHandle>>,
}

impl StreamManager {
    pub fn new(
        runtime: SharedRuntime,
        source: Rc<dyn TraceStreamSource>,
        api: Rc<dyn RunApi>,
        settings: StreamConfig,
    ) -> Self {
        Self {
            runtime,
            source,
            api,
            settings,
            scope: CancellationToken::new(),
            sessions: RefCell::new(HashMap::new()),
        }
    }

    pub fn open<F>(&self, entity_id: &str, on_update: F) -> SessionHandle
    where
        F: Fn(TraceStreamState) + 'static,
    {
        let previous = self.sessions.borrow_mut().remove(entity_id);
        if let Some(previous) = previous {
            previous.close();
        }

        let session = Rc::new(Session {
            entity_id: entity_id.to_string(),
            token: self.scope.child_token(),
            state: RefCell::new(SessionState::new(self.settings.max_retries)),
            log: RefCell::new(TraceLog::new(self.settings.max_trace_window)),
            error: RefCell::new(None),
            fallback_used: RefCell::new(false),
            on_update: Box::new(on_update),
        });
        let handle = SessionHandle {
            session: session.clone(),
        };
        self.sessions
            .borrow_mut()
            .insert(entity_id.to_string(), handle.clone());

        info!(entity_id, "opening trace stream session");
        let driver = SessionDriver {
            session,
            runtime: self.runtime.clone(),
            source: self.source.clone(),
            api: self.api.clone(),
            settings: self.settings.clone(),
        };
        self.runtime.spawn(Box::pin(driver.run()));
        handle
    }

    pub fn session(&self, entity_id: &str) -> Option<SessionHandle> {
        self.sessions.borrow().get(entity_id).cloned()
    }

    pub fn close(&self, entity_id: &str) {
        let handle = self.sessions.borrow_mut().remove(entity_id);
        if let Some(handle) = handle {
            handle.close();
        }
    }

    pub fn close_all(&self) {
        let handles: Vec<SessionHandle> = self
            .sessions
            .borrow_mut()
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in handles {
            handle.close();
        }
        self.scope.cancel();
    }

    /// Sessions still holding or awaiting a connection.
    pub fn active_sessions(&self) -> usize {
        self.sessions
            .borrow()
            .values()
            .filter(|handle| !handle.is_closed() && !handle.status().is_terminal())
            .count()
    }
}

impl Drop for StreamManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[derive(Clone)]
struct SessionDriver {
    session: Rc<Session>,
    runtime: SharedRuntime,
    source: Rc<dyn TraceStreamSource>,
    api: Rc<dyn RunApi>,
    settings: StreamConfig,
}

enum Flow {
    Continue,
    Stop,
}

impl SessionDriver {
    async fn run(self) {
        let token = self.session.token.clone();
        self.spawn_watchdog();
        self.session.publish();

        loop {
            self.connect_once().await;
            if token.is_cancelled() || self.session.status() != SessionStatus::Retrying {
                return;
            }

            if !sleep_or_cancel(self.runtime.as_ref(), self.settings.retry_delay(), &token).await {
                return;
            }
            let effects = self.session.dispatch(SessionEvent::RetryElapsed);
            self.apply(effects);
            self.session.publish();
        }
    }

    async fn connect_once(&self) {
        let token = self.session.token.clone();
        let entity_id = self.session.entity_id.clone();

        let mut stream = match run_or_cancel(self.source.open(&entity_id), &token).await {
            None => return,
            Some(Ok(stream)) => stream,
            Some(Err(err)) => {
                self.fail(&err.to_string());
                return;
            }
        };

        loop {
            let signal = match run_or_cancel(stream.next(), &token).await {
                None => return,
                Some(None) => {
                    self.fail("stream ended without completion");
                    return;
                }
                Some(Some(signal)) => signal,
            };

            match signal {
                StreamSignal::Opened => {
                    let effects = self.session.dispatch(SessionEvent::Opened);
                    self.apply(effects);
                    self.session.publish();
                }
                StreamSignal::Message(payload) => {
                    if let Flow::Stop = self.handle_message(&payload) {
                        return;
                    }
                }
                StreamSignal::Failed(reason) => {
                    self.fail(&reason);
                    return;
                }
            }
        }
    }

    fn handle_message(&self, payload: &str) -> Flow {
        let payload = payload.trim();
        if payload == DONE_SENTINEL {
            let effects = self.session.dispatch(SessionEvent::DoneReceived);
            self.apply(effects);
            self.session.publish();
            return Flow::Stop;
        }
        if self.session.status().is_terminal() {
            return Flow::Stop;
        }

        match serde_json::from_str::<TraceRecord>(payload) {
            Ok(record) => {
                let added = self.session.log.borrow_mut().insert(record);
                let effects = self.session.dispatch(SessionEvent::RecordIngested);
                self.apply(effects);
                self.session.set_error(None);
                if added {
                    debug!(entity_id = %self.session.entity_id, "trace record merged");
                }
                self.session.publish();
            }
            Err(err) => {
                let error = PipelineError::from(err);
                warn!(
                    entity_id = %self.session.entity_id,
                    "dropping malformed trace message: {}",
                    error
                );
                self.session
                    .set_error(Some(format!("Dropped malformed trace message: {error}")));
                self.session.publish();
            }
        }
        Flow::Continue
    }

    fn fail(&self, reason: &str) {
        let effects = self.session.dispatch(SessionEvent::TransportFailed);
        let (status, retry_count, max_retries) = {
            let state = self.session.state.borrow();
            (state.status, state.retry_count, state.max_retries)
        };

        match status {
            SessionStatus::Retrying => {
                warn!(
                    entity_id = %self.session.entity_id,
                    retry_count,
                    max_retries,
                    "trace stream dropped: {}",
                    reason
                );
                self.session.set_error(Some(format!(
                    "Connection lost ({reason}); reconnecting (attempt {retry_count}/{max_retries})"
                )));
            }
            SessionStatus::Error => {
                let error = PipelineError::ServiceUnavailable(format!(
                    "trace stream failed after {max_retries} retries: {reason}"
                ));
                self.session.set_error(Some(error.to_string()));
            }
            _ => {}
        }

        self.apply(effects);
        self.session.publish();
    }

    fn apply(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::RunFallback => self.spawn_fallback(),
                Effect::MarkComplete => {
                    info!(
                        entity_id = %self.session.entity_id,
                        records = self.session.log.borrow().len(),
                        "trace stream complete"
                    );
                }
                Effect::RetriesExhausted => {
                    warn!(
                        entity_id = %self.session.entity_id,
                        "trace stream retries exhausted; falling back to one-shot fetch"
                    );
                }
                Effect::ScheduleRetry { attempt } => {
                    debug!(
                        entity_id = %self.session.entity_id,
                        attempt,
                        "reconnect scheduled"
                    );
                }
                // The connect loop owns the connection itself.
                Effect::OpenConnection | Effect::CloseConnection => {}
            }
        }
    }

    fn spawn_watchdog(&self) {
        let driver = self.clone();
        self.runtime.spawn(Box::pin(async move {
            let token = driver.session.token.clone();
            let deadline = driver.settings.watchdog();
            if !sleep_or_cancel(driver.runtime.as_ref(), deadline, &token).await {
                return;
            }
            let effects = driver.session.dispatch(SessionEvent::WatchdogElapsed);
            if effects.contains(&Effect::RunFallback) {
                info!(
                    entity_id = %driver.session.entity_id,
                    "no trace data within watchdog deadline; running one-shot fetch"
                );
            }
            driver.apply(effects);
        }));
    }

    fn spawn_fallback(&self) {
        let session = self.session.clone();
        let api = self.api.clone();
        self.runtime.spawn(Box::pin(async move {
            let token = session.token.clone();
            let entity_id = session.entity_id.clone();
            match run_or_cancel(api.fetch_traces(&entity_id), &token).await {
                None => {}
                Some(Ok(records)) => {
                    let added = session.log.borrow_mut().merge_batch(records);
                    *session.fallback_used.borrow_mut() = true;
                    info!(entity_id = %entity_id, added, "one-shot trace fetch merged");
                    session.publish();
                }
                Some(Err(err)) => {
                    warn!(entity_id = %entity_id, "one-shot trace fetch failed: {}", err);
                    if session.error.borrow().is_none() {
                        session.set_error(Some(format!("Failed to load traces: {err}")));
                    }
                    session.publish();
                }
            }
        }));
    }
}
