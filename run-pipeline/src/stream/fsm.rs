//! Session state machine.
//!
//! `CONNECTING → OPEN → (transport failure) → RETRYING → CONNECTING …`,
//! ending in `COMPLETE` (sentinel received), `CLOSED` (closed by the view) or
//! `ERROR` (retries exhausted). Transitions are pure so the retry policy can be
//! tested without timers; the session driver interprets the returned effects.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Connecting,
    Open,
    /// Transport failed; a reconnect is scheduled.
    Retrying,
    /// Retries exhausted. No further automatic reconnects.
    Error,
    /// `[DONE]` received; ingestion finished.
    Complete,
    Closed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error | Self::Complete | Self::Closed)
    }

    /// States in which a push connection is (being) held.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Opened,
    RecordIngested,
    DoneReceived,
    TransportFailed,
    RetryElapsed,
    WatchdogElapsed,
    CloseRequested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    OpenConnection,
    CloseConnection,
    ScheduleRetry { attempt: u32 },
    RunFallback,
    MarkComplete,
    RetriesExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub status: SessionStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub received_any: bool,
    pub fallback_started: bool,
}

impl SessionState {
    pub fn new(max_retries: u32) -> Self {
        Self {
            status: SessionStatus::Connecting,
            retry_count: 0,
            max_retries,
            received_any: false,
            fallback_started: false,
        }
    }
}

pub fn transition(state: &SessionState, event: SessionEvent) -> (SessionState, Vec<Effect>) {
    let mut next = state.clone();
    let status = state.status;

    let effects = match event {
        _ if status.is_terminal() => Vec::new(),

        SessionEvent::Opened if status == SessionStatus::Connecting => {
            next.status = SessionStatus::Open;
            Vec::new()
        }

        SessionEvent::RecordIngested if status.is_live() => {
            // A delivered record proves the connection healthy again, so
            // only back-to-back failures count toward the retry budget.
            next.status = SessionStatus::Open;
            next.received_any = true;
            next.retry_count = 0;
            Vec::new()
        }

        SessionEvent::DoneReceived if status.is_live() => {
            next.status = SessionStatus::Complete;
            vec![Effect::CloseConnection, Effect::MarkComplete]
        }

        SessionEvent::TransportFailed if status.is_live() => {
            if state.retry_count < state.max_retries {
                next.retry_count = state.retry_count + 1;
                next.status = SessionStatus::Retrying;
                vec![
                    Effect::CloseConnection,
                    Effect::ScheduleRetry {
                        attempt: next.retry_count,
                    },
                ]
            } else {
                // A final one-shot fetch recovers whatever the outage hid,
                // even if the watchdog already fetched once.
                next.status = SessionStatus::Error;
                next.fallback_started = true;
                vec![
                    Effect::CloseConnection,
                    Effect::RetriesExhausted,
                    Effect::RunFallback,
                ]
            }
        }

        SessionEvent::RetryElapsed if status == SessionStatus::Retrying => {
            next.status = SessionStatus::Connecting;
            vec![Effect::OpenConnection]
        }

        SessionEvent::WatchdogElapsed => {
            if state.received_any || state.fallback_started {
                Vec::new()
            } else {
                next.fallback_started = true;
                vec![Effect::RunFallback]
            }
        }

        SessionEvent::CloseRequested => {
            next.status = SessionStatus::Closed;
            if status.is_live() {
                vec![Effect::CloseConnection]
            } else {
                Vec::new()
            }
        }

        _ => Vec::new(),
    };

    (next, effects)
}
