//! Diagnostic channel: asynchronous notifications from stages and the
//! single-consumer dispatch loop that governs the running pipeline.
//!
//! Stages (and their worker threads) hold cloned senders; the orchestration
//! core blocks in `DiagnosticChannel::run`, which is its sole suspension
//! point. Notifications from one stage arrive in emission order; there is
//! no ordering guarantee across stages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use crate::lifecycle::{LifecycleController, PipelineState};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One asynchronous notification from a stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    /// Fatal runtime fault. Terminates the pipeline.
    Error { stage: String, detail: String },
    /// Non-fatal condition, logged and ignored.
    Warning { stage: String, detail: String },
    /// A stream ran dry. Ends the pipeline gracefully.
    EndOfStream { stage: String },
    /// A stage acknowledged a state transition.
    StateChanged { stage: String, state: PipelineState },
    /// A notification kind this core does not recognize. Logged and ignored.
    Other { stage: String, kind: String },
}

/// Producer half of the diagnostic channel. Cheap to clone; one per stage
/// runtime (plus one held by the lifecycle controller).
#[derive(Clone)]
pub struct DiagnosticSender {
    tx: mpsc::Sender<Notification>,
}

impl DiagnosticSender {
    pub fn emit(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            // Receiver already gone; only happens during teardown.
            log::debug!("diagnostic channel closed, notification dropped");
        }
    }

    pub fn error(&self, stage: &str, detail: impl Into<String>) {
        self.emit(Notification::Error {
            stage: stage.to_string(),
            detail: detail.into(),
        });
    }

    pub fn warning(&self, stage: &str, detail: impl Into<String>) {
        self.emit(Notification::Warning {
            stage: stage.to_string(),
            detail: detail.into(),
        });
    }

    pub fn end_of_stream(&self, stage: &str) {
        self.emit(Notification::EndOfStream {
            stage: stage.to_string(),
        });
    }

    pub fn state_changed(&self, stage: &str, state: PipelineState) {
        self.emit(Notification::StateChanged {
            stage: stage.to_string(),
            state,
        });
    }
}

/// Why the dispatch loop terminated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// A stage reported end of stream; the pipeline drained and stopped.
    EndOfStream,
    /// A stage reported a fatal error; the pipeline was stopped.
    Fault { stage: String, detail: String },
    /// An external interrupt (SIGINT) requested shutdown.
    Interrupted,
}

/// Consumer half of the diagnostic channel.
pub struct DiagnosticChannel {
    rx: mpsc::Receiver<Notification>,
}

/// Create a connected sender/channel pair.
pub fn channel() -> (DiagnosticSender, DiagnosticChannel) {
    let (tx, rx) = mpsc::channel();
    (DiagnosticSender { tx }, DiagnosticChannel { rx })
}

impl DiagnosticChannel {
    /// Dispatch notifications until a terminal event arrives, then stop the
    /// pipeline and report why.
    ///
    /// The `interrupt` flag is polled between receives so an external
    /// SIGINT handler can request shutdown without a notification.
    pub fn run(
        &mut self,
        controller: &mut LifecycleController,
        interrupt: &AtomicBool,
    ) -> RunOutcome {
        loop {
            if interrupt.load(Ordering::SeqCst) {
                log::info!("external interrupt received, stopping pipeline");
                controller.stop();
                return RunOutcome::Interrupted;
            }

            let notification = match self.rx.recv_timeout(POLL_INTERVAL) {
                Ok(notification) => notification,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    // Every producer is gone; nothing further can arrive.
                    log::info!("all notification producers gone, treating as end of stream");
                    controller.stop();
                    return RunOutcome::EndOfStream;
                }
            };

            match notification {
                Notification::Error { stage, detail } => {
                    log::error!("stage '{}' reported error: {}", stage, detail);
                    controller.stop();
                    return RunOutcome::Fault { stage, detail };
                }
                Notification::EndOfStream { stage } => {
                    log::info!("stage '{}' reached end of stream", stage);
                    controller.stop();
                    return RunOutcome::EndOfStream;
                }
                Notification::Warning { stage, detail } => {
                    log::warn!("stage '{}': {}", stage, detail);
                }
                Notification::StateChanged { stage, state } => {
                    log::info!("stage '{}' now {}", stage, state);
                }
                Notification::Other { stage, kind } => {
                    log::warn!("stage '{}' sent unrecognized notification '{}'", stage, kind);
                }
            }
        }
    }
}
