//! Live trace streaming with reconnect, watchdog and one-shot fallback.

pub mod fsm;
mod manager;

pub use fsm::{SessionEvent, SessionState, SessionStatus};
pub use manager::{SessionHandle, StreamManager, TraceStreamState};
