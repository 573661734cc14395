use std::cell::RefCell;

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{handle_message, WorkerClient, WorkerTransport};
use crate::error::PipelineError;
use crate::runtime::SharedRuntime;

/// Offload worker on a dedicated OS thread, for native builds.
pub struct ThreadWorker;

impl ThreadWorker {
    /// Start the thread and a response pump on `runtime`.
    pub fn spawn(runtime: &SharedRuntime) -> Result<WorkerClient, PipelineError> {
        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<String>();
        let (response_tx, mut response_rx) = mpsc::unbounded_channel::<String>();

        std::thread::Builder::new()
            .name("run-observer-worker".to_string())
            .spawn(move || {
                while let Some(message) = request_rx.blocking_recv() {
                    if response_tx.send(handle_message(&message)).is_err() {
                        break;
                    }
                }
                debug!("worker thread exiting");
            })
            .map_err(|err| PipelineError::Worker(format!("failed to start worker thread: {err}")))?;

        let client = WorkerClient::new(Box::new(ThreadTransport {
            sender: RefCell::new(Some(request_tx)),
        }));

        let weak = client.downgrade();
        runtime.spawn(Box::pin(async move {
            while let Some(raw) = response_rx.recv().await {
                match weak.upgrade() {
                    Some(client) => client.deliver(&raw),
                    None => break,
                }
            }
        }));

        info!("offload worker thread started");
        Ok(client)
    }
}

struct ThreadTransport {
    sender: RefCell<Option<mpsc::UnboundedSender<String>>>,
}

impl WorkerTransport for ThreadTransport {
    fn post(&self, message: String) -> Result<(), PipelineError> {
        let sender = self.sender.borrow();
        let sender = sender.as_ref().ok_or(PipelineError::WorkerUnavailable)?;
        sender
            .send(message)
            .map_err(|_| PipelineError::WorkerUnavailable)
    }

    fn terminate(&self) {
        // Closing the channel ends the thread's receive loop.
        self.sender.borrow_mut().take();
    }
}
