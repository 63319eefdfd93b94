//! Linear-backoff reconnection policy for the progress stream.
//!
//! The stream connection consults [`ReconnectPolicy::next_attempt`] after
//! every transport failure. Attempt `n` waits `n * base_delay`; once the
//! attempt budget is spent the failure is surfaced instead of retried.

use std::time::Duration;

/// Default delay unit between reconnection attempts.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default number of reconnection attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Tunable parameters for the linear-backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay unit; attempt `n` waits `n` units.
    pub base_delay: Duration,
    /// Upper bound on consecutive reconnection attempts.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnection attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Plan the next attempt after `attempts_so_far` consecutive failures.
    ///
    /// Returns the new attempt number and its delay, or `None` when the
    /// budget is exhausted.
    pub fn next_attempt(&self, attempts_so_far: u32) -> Option<(u32, Duration)> {
        let attempt = attempts_so_far.saturating_add(1);
        (attempt <= self.max_attempts).then(|| (attempt, self.delay_for(attempt)))
    }
}
