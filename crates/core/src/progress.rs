//! Progress state model for a tracked analysis job.
//!
//! [`ProgressState`] is the single value a display layer renders. Its
//! [`Step`] moves through the pipeline phases and ends in one of two
//! terminal steps, after which the state is frozen.

use serde::Serialize;

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// Pipeline phase reported to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Idle,
    Initializing,
    Connected,
    Research,
    Scenarios,
    Strategies,
    Processing,
    Completed,
    Failed,
}

impl Step {
    /// `completed` and `failed` end a subscription; nothing leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(self, Step::Completed | Step::Failed)
    }

    /// Steps during which the job is actively running on the backend.
    ///
    /// The stall watchdog only falls back to polling while in one of these.
    /// `idle` and `connected` are excluded: nothing is known to be running yet.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            Step::Initializing
                | Step::Processing
                | Step::Research
                | Step::Scenarios
                | Step::Strategies
        )
    }

    /// Wire / log name of the step.
    pub fn as_str(self) -> &'static str {
        match self {
            Step::Idle => "idle",
            Step::Initializing => "initializing",
            Step::Connected => "connected",
            Step::Research => "research",
            Step::Scenarios => "scenarios",
            Step::Strategies => "strategies",
            Step::Processing => "processing",
            Step::Completed => "completed",
            Step::Failed => "failed",
        }
    }

    /// Human-readable heading for a progress panel.
    pub fn label(self) -> &'static str {
        match self {
            Step::Research => "Research Phase",
            Step::Scenarios => "Scenario Generation",
            Step::Strategies => "Strategy Development",
            Step::Processing => "Processing",
            Step::Completed => "Completed",
            Step::Failed => "Failed",
            Step::Connected => "Connected",
            Step::Idle | Step::Initializing => "Initializing",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ProgressState
// ---------------------------------------------------------------------------

/// Upper bound of [`ProgressState::progress`].
pub const MAX_PROGRESS: u8 = 100;

/// Snapshot of a job's progress as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressState {
    pub step: Step,
    pub message: String,
    /// Percentage in `0..=100`.
    pub progress: u8,
}

impl ProgressState {
    /// Build a state, clamping `progress` to [`MAX_PROGRESS`].
    pub fn new(step: Step, message: impl Into<String>, progress: u8) -> Self {
        Self {
            step,
            message: message.into(),
            progress: progress.min(MAX_PROGRESS),
        }
    }

    /// The state every fresh subscription starts from: `{idle, "", 0}`.
    pub fn idle() -> Self {
        Self::new(Step::Idle, "", 0)
    }

    pub fn is_terminal(&self) -> bool {
        self.step.is_terminal()
    }
}

impl Default for ProgressState {
    fn default() -> Self {
        Self::idle()
    }
}
