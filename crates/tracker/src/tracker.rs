//! Progress tracker: one job id, one stream, one watchdog.
//!
//! [`ProgressTracker`] owns the canonical [`ProgressState`] for the job it
//! is subscribed to. Subscribing spawns a [`StreamConnection`] and a
//! [`StallWatchdog`]; both feed observations back through an
//! [`EpochHandle`], which applies them with the core interpreter under a
//! single lock. Every subscribe/unsubscribe advances the epoch, so results
//! from work launched for an earlier subscription are discarded.
//!
//! Consumers read snapshots via [`ProgressTracker::snapshot`] or follow
//! them through the `watch` channel from [`ProgressTracker::watch`].

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use foresight_core::interpreter::interpret;
use foresight_core::progress::{ProgressState, Step};
use foresight_core::progress_events::ProgressEvent;
use foresight_core::types::JobId;

use crate::api::StatusSource;
use crate::config::TrackerConfig;
use crate::connection::StreamConnection;
use crate::error::TrackerError;
use crate::transport::EventTransport;
use crate::watchdog::StallWatchdog;

// ---------------------------------------------------------------------------
// ProgressSnapshot
// ---------------------------------------------------------------------------

/// What a consumer sees: the tracked job, its progress, and the last
/// surfaced error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub job_id: Option<JobId>,
    pub state: ProgressState,
    pub error: Option<TrackerError>,
}

impl ProgressSnapshot {
    fn detached() -> Self {
        Self {
            job_id: None,
            state: ProgressState::idle(),
            error: None,
        }
    }
}

// ---------------------------------------------------------------------------
// TrackerCore
// ---------------------------------------------------------------------------

/// Sole writer of the progress state.
pub(crate) struct TrackerCore {
    inner: Mutex<CoreInner>,
    snapshot_tx: watch::Sender<ProgressSnapshot>,
}

struct CoreInner {
    epoch: u64,
    snapshot: ProgressSnapshot,
    /// Cancelled when the current subscription reaches a terminal step.
    scope: Option<CancellationToken>,
}

impl TrackerCore {
    pub(crate) fn new() -> Arc<Self> {
        let (snapshot_tx, _) = watch::channel(ProgressSnapshot::detached());
        Arc::new(Self {
            inner: Mutex::new(CoreInner {
                epoch: 0,
                snapshot: ProgressSnapshot::detached(),
                scope: None,
            }),
            snapshot_tx,
        })
    }

    /// Start a fresh epoch for `job_id` with a clean `{idle, "", 0}` state.
    pub(crate) fn begin(self: &Arc<Self>, job_id: JobId, scope: CancellationToken) -> EpochHandle {
        let mut inner = self.lock();
        inner.epoch += 1;
        inner.scope = Some(scope);
        inner.snapshot = ProgressSnapshot {
            job_id: Some(job_id),
            state: ProgressState::idle(),
            error: None,
        };
        self.publish(&inner);

        EpochHandle {
            core: Arc::clone(self),
            epoch: inner.epoch,
        }
    }

    /// Invalidate the current epoch and detach from any job.
    pub(crate) fn end(&self) {
        let mut inner = self.lock();
        inner.epoch += 1;
        inner.scope = None;
        inner.snapshot = ProgressSnapshot::detached();
        self.publish(&inner);
    }

    pub(crate) fn snapshot(&self) -> ProgressSnapshot {
        self.lock().snapshot.clone()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<ProgressSnapshot> {
        self.snapshot_tx.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, CoreInner> {
        // Critical sections never panic midway; a poisoned lock still holds
        // a consistent snapshot.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, inner: &CoreInner) {
        self.snapshot_tx.send_replace(inner.snapshot.clone());
    }
}

// ---------------------------------------------------------------------------
// EpochHandle
// ---------------------------------------------------------------------------

/// Write access to the tracker, bound to the epoch it was issued for.
///
/// Every method is a no-op (returning `None` / `false`) once the tracker
/// has moved on to another epoch.
#[derive(Clone)]
pub struct EpochHandle {
    core: Arc<TrackerCore>,
    epoch: u64,
}

impl EpochHandle {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Current step, or `None` if this handle is stale.
    pub fn current_step(&self) -> Option<Step> {
        let inner = self.core.lock();
        (inner.epoch == self.epoch).then_some(inner.snapshot.state.step)
    }

    /// Fold `event` into the tracked state.
    ///
    /// Returns the resulting state (unchanged if the event had no effect),
    /// or `None` if the handle is stale and nothing was applied. Entering a
    /// terminal step cancels the subscription scope, which stops both the
    /// stream and the watchdog.
    pub fn apply(&self, event: &ProgressEvent) -> Option<ProgressState> {
        let mut inner = self.core.lock();
        if inner.epoch != self.epoch {
            tracing::debug!(
                epoch = self.epoch,
                current_epoch = inner.epoch,
                tag = event.tag(),
                "Discarding event from stale subscription",
            );
            return None;
        }

        let prior = &inner.snapshot.state;
        let next = interpret(prior, event);
        if next == *prior {
            return Some(next);
        }

        let entering_terminal = next.is_terminal() && !prior.is_terminal();
        tracing::debug!(
            job_id = inner.snapshot.job_id,
            step = %next.step,
            progress = next.progress,
            "Progress updated",
        );
        inner.snapshot.state = next.clone();

        if entering_terminal {
            match next.step {
                Step::Failed => {
                    inner.snapshot.error =
                        Some(TrackerError::TerminalFailure(next.message.clone()));
                }
                // The job finished, so an earlier ambiguous close was benign.
                Step::Completed => {
                    if matches!(inner.snapshot.error, Some(TrackerError::Transport(_))) {
                        inner.snapshot.error = None;
                    }
                }
                _ => {}
            }
            if let Some(scope) = &inner.scope {
                scope.cancel();
            }
            tracing::info!(
                job_id = inner.snapshot.job_id,
                step = %next.step,
                "Analysis reached terminal state",
            );
        }

        self.core.publish(&inner);
        Some(next)
    }

    /// Surface a connection error to the consumer.
    ///
    /// Ignored for stale handles and after a terminal step.
    pub fn report_error(&self, error: TrackerError) -> bool {
        let mut inner = self.core.lock();
        if inner.epoch != self.epoch || inner.snapshot.state.is_terminal() {
            return false;
        }
        inner.snapshot.error = Some(error);
        self.core.publish(&inner);
        true
    }
}

// ---------------------------------------------------------------------------
// ProgressTracker
// ---------------------------------------------------------------------------

/// Tracks the progress of exactly one analysis job at a time.
///
/// Dropping the tracker tears down the active subscription.
pub struct ProgressTracker {
    transport: Arc<dyn EventTransport>,
    status_source: Arc<dyn StatusSource>,
    config: TrackerConfig,
    core: Arc<TrackerCore>,
    active: Option<Subscription>,
}

/// Everything created for one job id; torn down together.
struct Subscription {
    job_id: JobId,
    scope: CancellationToken,
    connection: StreamConnection,
    watchdog: StallWatchdog,
}

impl ProgressTracker {
    pub fn new(
        transport: Arc<dyn EventTransport>,
        status_source: Arc<dyn StatusSource>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            transport,
            status_source,
            config,
            core: TrackerCore::new(),
            active: None,
        }
    }

    /// Start tracking `job_id` from a clean state.
    ///
    /// Any previous subscription is torn down first, even for the same id.
    /// Must be called from within a Tokio runtime.
    pub fn subscribe(&mut self, job_id: JobId) {
        self.teardown();

        let scope = CancellationToken::new();
        let handle = self.core.begin(job_id, scope.clone());

        tracing::info!(job_id, epoch = handle.epoch(), "Subscribing to analysis progress");

        let watchdog = StallWatchdog::start(
            Arc::clone(&self.status_source),
            job_id,
            &self.config,
            handle.clone(),
            scope.child_token(),
        );
        let connection = StreamConnection::open(
            Arc::clone(&self.transport),
            job_id,
            &self.config,
            watchdog.activity(),
            handle,
            scope.child_token(),
        );

        self.active = Some(Subscription {
            job_id,
            scope,
            connection,
            watchdog,
        });
    }

    /// Stop tracking. Idempotent.
    pub fn unsubscribe(&mut self) {
        if let Some(job_id) = self.job_id() {
            tracing::info!(job_id, "Unsubscribing from analysis progress");
        }
        self.teardown();
    }

    /// Follow a possibly-absent job id.
    ///
    /// `None` unsubscribes, an unchanged id is a no-op, a new id resubscribes.
    pub fn track(&mut self, job_id: Option<JobId>) {
        match job_id {
            None => self.unsubscribe(),
            Some(id) if self.job_id() == Some(id) => {}
            Some(id) => self.subscribe(id),
        }
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.active.as_ref().map(|s| s.job_id)
    }

    pub fn is_subscribed(&self) -> bool {
        self.active.is_some()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.core.snapshot()
    }

    pub fn state(&self) -> ProgressState {
        self.core.snapshot().state
    }

    pub fn error(&self) -> Option<TrackerError> {
        self.core.snapshot().error
    }

    /// Receive every published snapshot.
    pub fn watch(&self) -> watch::Receiver<ProgressSnapshot> {
        self.core.watch()
    }

    // ---- private helpers ----

    fn teardown(&mut self) {
        if let Some(sub) = self.active.take() {
            sub.connection.close();
            sub.watchdog.cancel();
            sub.scope.cancel();
        }
        self.core.end();
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.teardown();
    }
}
