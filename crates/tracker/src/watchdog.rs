//! Stall watchdog: polling fallback for a silent push stream.
//!
//! Ticks on a fixed interval for the lifetime of a subscription. On a tick
//! where the job is in flight and nothing has arrived for longer than the
//! stall threshold, it asks the [`StatusSource`] for the job's status and
//! applies a terminal answer exactly as if it had arrived on the stream.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use foresight_core::progress_events::ProgressEvent;
use foresight_core::types::JobId;

use crate::api::StatusSource;
use crate::config::{TrackerConfig, DEFAULT_WATCHDOG_INTERVAL};
use crate::tracker::EpochHandle;

/// Watchdog bookkeeping shared with the stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogState {
    /// When the last push event (or successful open) was observed.
    pub last_event: Instant,
    pub active: bool,
}

/// Records push-stream activity for the watchdog.
#[derive(Debug, Clone)]
pub struct ActivityHandle(Arc<Mutex<WatchdogState>>);

impl ActivityHandle {
    pub(crate) fn new() -> Self {
        Self(Arc::new(Mutex::new(WatchdogState {
            last_event: Instant::now(),
            active: true,
        })))
    }

    /// Mark "an event was just received".
    pub fn touch(&self) {
        self.lock().last_event = Instant::now();
    }

    pub fn last_event(&self) -> Instant {
        self.lock().last_event
    }

    /// Time since the last recorded activity.
    pub fn silence(&self) -> Duration {
        self.last_event().elapsed()
    }

    fn lock(&self) -> MutexGuard<'_, WatchdogState> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Periodic status checker for one subscription.
pub struct StallWatchdog {
    activity: ActivityHandle,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl StallWatchdog {
    /// Spawn the watchdog. The first tick fires one interval from now.
    pub fn start(
        source: Arc<dyn StatusSource>,
        job_id: JobId,
        config: &TrackerConfig,
        handle: EpochHandle,
        cancel: CancellationToken,
    ) -> Self {
        // A zero period would make the interval panic inside the task.
        let period = if config.watchdog_interval.is_zero() {
            tracing::warn!(
                job_id,
                fallback_secs = DEFAULT_WATCHDOG_INTERVAL.as_secs(),
                "Zero watchdog interval, using default",
            );
            DEFAULT_WATCHDOG_INTERVAL
        } else {
            config.watchdog_interval
        };

        let activity = ActivityHandle::new();
        let task = tokio::spawn(run_watchdog(
            source,
            job_id,
            period,
            config.stall_threshold,
            activity.clone(),
            handle,
            cancel.clone(),
        ));

        Self {
            activity,
            cancel,
            task: Some(task),
        }
    }

    /// Handle the stream connection uses to report activity.
    pub fn activity(&self) -> ActivityHandle {
        self.activity.clone()
    }

    pub fn state(&self) -> WatchdogState {
        *self.activity.lock()
    }

    pub fn is_active(&self) -> bool {
        self.activity.lock().active
    }

    /// Stop ticking. No status check is issued after this returns, and an
    /// in-flight check is abandoned.
    pub fn cancel(&self) {
        self.activity.lock().active = false;
        self.cancel.cancel();
    }
}

impl Drop for StallWatchdog {
    fn drop(&mut self) {
        self.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_watchdog(
    source: Arc<dyn StatusSource>,
    job_id: JobId,
    period: Duration,
    threshold: Duration,
    activity: ActivityHandle,
    handle: EpochHandle,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let step = match handle.current_step() {
            Some(step) if !step.is_terminal() => step,
            _ => break,
        };

        let silence = activity.silence();
        if !step.is_in_flight() || silence <= threshold {
            continue;
        }

        tracing::debug!(
            job_id,
            step = %step,
            silence_secs = silence.as_secs(),
            "Push stream silent, checking job status",
        );

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = source.fetch_status(job_id) => result,
        };

        match result {
            Ok(status) if status.is_terminal() => {
                tracing::info!(job_id, status = %status, "Status check found terminal job");
                handle.apply(&ProgressEvent::status(status, None));
            }
            Ok(status) => {
                tracing::debug!(job_id, status = %status, "Job still running");
            }
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Status check failed");
            }
        }
    }

    activity.lock().active = false;
}

#[cfg(test)]
mod tests {
    use foresight_core::progress::Step;
    use foresight_core::progress_events::RemoteStatus;

    use super::*;
    use crate::api::ApiError;
    use crate::testing::{settle, ScriptedStatus};
    use crate::tracker::TrackerCore;

    fn offsets(status: &ScriptedStatus, started: Instant) -> Vec<u64> {
        status
            .call_times()
            .iter()
            .map(|t| t.duration_since(started).as_secs())
            .collect()
    }

    fn in_flight(core: &Arc<TrackerCore>) -> EpochHandle {
        let handle = core.begin(1, CancellationToken::new());
        handle.apply(&ProgressEvent::ResearchStart);
        handle
    }

    #[tokio::test(start_paused = true)]
    async fn checks_once_per_tick_after_threshold() {
        let core = TrackerCore::new();
        let handle = in_flight(&core);
        let status = ScriptedStatus::new();
        let started = Instant::now();

        let watchdog = StallWatchdog::start(
            status.clone(),
            1,
            &TrackerConfig::default(),
            handle,
            CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(offsets(&status, started), vec![20, 25, 30]);
        assert!(watchdog.is_active());
        assert_eq!(core.snapshot().state.step, Step::Research);
    }

    #[tokio::test(start_paused = true)]
    async fn activity_postpones_checks() {
        let core = TrackerCore::new();
        let handle = in_flight(&core);
        let status = ScriptedStatus::new();
        let started = Instant::now();

        let watchdog = StallWatchdog::start(
            status.clone(),
            1,
            &TrackerConfig::default(),
            handle,
            CancellationToken::new(),
        );
        let activity = watchdog.activity();

        tokio::time::sleep(Duration::from_secs(12)).await;
        activity.touch();
        tokio::time::sleep(Duration::from_secs(19)).await;

        // Silence exceeds 15s only after t=27, so the first check is at 30.
        assert_eq!(offsets(&status, started), vec![30]);
    }

    #[tokio::test(start_paused = true)]
    async fn no_checks_unless_in_flight() {
        let core = TrackerCore::new();
        let handle = core.begin(1, CancellationToken::new());
        handle.apply(&ProgressEvent::status(RemoteStatus::Pending, None));
        assert_eq!(core.snapshot().state.step, Step::Connected);
        let status = ScriptedStatus::new();

        let _watchdog = StallWatchdog::start(
            status.clone(),
            1,
            &TrackerConfig::default(),
            handle,
            CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(status.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_status_is_applied_and_stops_ticking() {
        let core = TrackerCore::new();
        let handle = in_flight(&core);
        let status = ScriptedStatus::new();
        status.push(Ok(RemoteStatus::Completed));

        let watchdog = StallWatchdog::start(
            status.clone(),
            1,
            &TrackerConfig::default(),
            handle,
            CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_secs(60)).await;
        let state = core.snapshot().state;
        assert_eq!(state.step, Step::Completed);
        assert_eq!(state.progress, 100);
        assert_eq!(status.call_count(), 1);
        assert!(!watchdog.state().active);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_falls_back_to_default() {
        let core = TrackerCore::new();
        let handle = in_flight(&core);
        let status = ScriptedStatus::new();
        status.push(Ok(RemoteStatus::Failed));
        let started = Instant::now();
        let config = TrackerConfig {
            watchdog_interval: Duration::ZERO,
            ..TrackerConfig::default()
        };

        let watchdog = StallWatchdog::start(status.clone(), 1, &config, handle, CancellationToken::new());

        tokio::time::sleep(Duration::from_secs(19)).await;
        assert!(watchdog.is_active());
        assert_eq!(status.call_count(), 0);

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(offsets(&status, started), vec![20]);
        assert_eq!(core.snapshot().state.step, Step::Failed);
        assert!(!watchdog.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_checks_are_absorbed() {
        let core = TrackerCore::new();
        let handle = in_flight(&core);
        let status = ScriptedStatus::new();
        status.push(Err(ApiError::Status {
            status: 502,
            body: "bad gateway".into(),
        }));

        let _watchdog = StallWatchdog::start(
            status.clone(),
            1,
            &TrackerConfig::default(),
            handle,
            CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_secs(26)).await;
        assert_eq!(status.call_count(), 2);
        let snapshot = core.snapshot();
        assert_eq!(snapshot.state.step, Step::Research);
        assert!(snapshot.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_immediate() {
        let core = TrackerCore::new();
        let handle = in_flight(&core);
        let status = ScriptedStatus::new();

        let watchdog = StallWatchdog::start(
            status.clone(),
            1,
            &TrackerConfig::default(),
            handle,
            CancellationToken::new(),
        );
        settle().await;
        watchdog.cancel();
        assert!(!watchdog.is_active());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(status.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_epoch_stops_watchdog() {
        let core = TrackerCore::new();
        let handle = in_flight(&core);
        let status = ScriptedStatus::new();

        let watchdog = StallWatchdog::start(
            status.clone(),
            1,
            &TrackerConfig::default(),
            handle,
            CancellationToken::new(),
        );
        core.end();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(status.call_count(), 0);
        assert!(!watchdog.is_active());
    }
}
