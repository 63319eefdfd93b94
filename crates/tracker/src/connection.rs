//! Push-stream connection with linear-backoff reconnection.
//!
//! [`StreamConnection::open`] spawns a worker that opens the job's event
//! stream, feeds every event through the tracker's [`EpochHandle`], and
//! reconnects after transport failures until the attempt budget runs out.
//!
//! A stream that ends cleanly before a terminal event is treated as an
//! ambiguous close: the error is surfaced and no reconnect is attempted.
//! The stall watchdog keeps running and can still resolve the job.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use foresight_core::progress_events::ProgressEvent;
use foresight_core::types::JobId;

use crate::config::TrackerConfig;
use crate::error::{TrackerError, TransportError};
use crate::reconnect::ReconnectPolicy;
use crate::tracker::EpochHandle;
use crate::transport::{EventStream, EventTransport};
use crate::watchdog::ActivityHandle;

const AMBIGUOUS_CLOSE: &str = "Event stream closed before the analysis finished";

/// Lifecycle of the push stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected; either never opened or waiting to reconnect.
    Disconnected,
    Connecting,
    Open,
    /// Closed because the job reached a terminal step.
    ClosedTerminal,
    /// Closed for good without a terminal step (budget spent or
    /// ambiguous close).
    ClosedNonTerminal,
}

/// Handle to a running stream worker.
pub struct StreamConnection {
    cancel: CancellationToken,
    state_rx: watch::Receiver<ConnectionState>,
    attempts: Arc<AtomicU32>,
    task: Option<JoinHandle<()>>,
}

impl StreamConnection {
    /// A connection that was never opened.
    pub fn closed() -> Self {
        let (_, state_rx) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();
        cancel.cancel();
        Self {
            cancel,
            state_rx,
            attempts: Arc::new(AtomicU32::new(0)),
            task: None,
        }
    }

    /// Spawn a worker streaming events for `job_id` into `handle`.
    pub fn open(
        transport: Arc<dyn EventTransport>,
        job_id: JobId,
        config: &TrackerConfig,
        activity: ActivityHandle,
        handle: EpochHandle,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let attempts = Arc::new(AtomicU32::new(0));

        let worker = Worker {
            transport,
            job_id,
            policy: config.reconnect_policy(),
            activity,
            handle,
            cancel: cancel.clone(),
            state_tx,
            attempts: Arc::clone(&attempts),
        };
        let task = tokio::spawn(worker.run());

        Self {
            cancel,
            state_rx,
            attempts,
            task: Some(task),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Follow state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Consecutive failed attempts since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
            || matches!(
                self.state(),
                ConnectionState::ClosedTerminal | ConnectionState::ClosedNonTerminal
            )
    }

    /// Close the stream and cancel any pending reconnect. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        self.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

enum PumpOutcome {
    /// A terminal event was applied.
    Terminal,
    /// Cancelled, or the subscription moved on.
    Cancelled,
    /// The server closed the stream cleanly.
    Ended,
    /// The stream broke.
    Failed(TransportError),
}

struct Worker {
    transport: Arc<dyn EventTransport>,
    job_id: JobId,
    policy: ReconnectPolicy,
    activity: ActivityHandle,
    handle: EpochHandle,
    cancel: CancellationToken,
    state_tx: watch::Sender<ConnectionState>,
    attempts: Arc<AtomicU32>,
}

impl Worker {
    async fn run(self) {
        let job_id = self.job_id;

        loop {
            self.set_state(ConnectionState::Connecting);

            let opened = tokio::select! {
                _ = self.cancel.cancelled() => return self.finish_cancelled(),
                opened = self.transport.open(job_id) => opened,
            };

            let failure = match opened {
                Ok(stream) => {
                    self.attempts.store(0, Ordering::SeqCst);
                    self.set_state(ConnectionState::Open);
                    self.activity.touch();
                    tracing::info!(job_id, "Event stream opened");

                    match self.pump(stream).await {
                        PumpOutcome::Terminal => {
                            self.set_state(ConnectionState::ClosedTerminal);
                            self.cancel.cancel();
                            tracing::debug!(job_id, "Event stream closed after terminal event");
                            return;
                        }
                        PumpOutcome::Cancelled => return self.finish_cancelled(),
                        PumpOutcome::Ended => {
                            tracing::warn!(job_id, "Event stream closed before the analysis finished");
                            self.handle
                                .report_error(TrackerError::Transport(AMBIGUOUS_CLOSE.to_string()));
                            self.set_state(ConnectionState::ClosedNonTerminal);
                            return;
                        }
                        PumpOutcome::Failed(e) => e,
                    }
                }
                Err(e) => e,
            };

            // The server answered and refused the stream; retrying the same
            // request cannot help.
            if let TransportError::Status { status } = failure {
                tracing::error!(job_id, status, "Event stream rejected, not reconnecting");
                self.handle
                    .report_error(TrackerError::Transport(failure.to_string()));
                self.set_state(ConnectionState::ClosedNonTerminal);
                return;
            }

            let so_far = self.attempts.load(Ordering::SeqCst);
            let Some((attempt, delay)) = self.policy.next_attempt(so_far) else {
                tracing::error!(
                    job_id,
                    attempts = so_far,
                    error = %failure,
                    "Event stream failed, giving up",
                );
                self.handle
                    .report_error(TrackerError::Transport(failure.to_string()));
                self.set_state(ConnectionState::ClosedNonTerminal);
                return;
            };

            self.attempts.store(attempt, Ordering::SeqCst);
            self.set_state(ConnectionState::Disconnected);
            tracing::warn!(
                job_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "Event stream failed, reconnecting",
            );

            tokio::select! {
                _ = self.cancel.cancelled() => return self.finish_cancelled(),
                _ = tokio::time::sleep(delay) => {}
            }

            // The subscription may have ended while we slept.
            match self.handle.current_step() {
                Some(step) if !step.is_terminal() => {}
                _ => return self.finish_cancelled(),
            }
        }
    }

    async fn pump(&self, mut stream: EventStream) -> PumpOutcome {
        loop {
            let item = tokio::select! {
                _ = self.cancel.cancelled() => return PumpOutcome::Cancelled,
                item = stream.next() => item,
            };

            let raw = match item {
                None => return PumpOutcome::Ended,
                Some(Err(e)) => return PumpOutcome::Failed(e),
                Some(Ok(raw)) => raw,
            };

            let event = match ProgressEvent::parse(&raw) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(job_id = self.job_id, error = %e, "Dropping malformed progress event");
                    continue;
                }
            };
            self.activity.touch();

            match self.handle.apply(&event) {
                None => return PumpOutcome::Cancelled,
                Some(state) if state.is_terminal() => return PumpOutcome::Terminal,
                Some(_) => {}
            }
        }
    }

    fn finish_cancelled(&self) {
        let state = match self.handle.current_step() {
            Some(step) if step.is_terminal() => ConnectionState::ClosedTerminal,
            _ => ConnectionState::Disconnected,
        };
        self.set_state(state);
        tracing::debug!(job_id = self.job_id, state = ?state, "Event stream worker stopped");
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }
}
