//! Event interpreter: folds progress events into a [`ProgressState`].
//!
//! [`interpret`] is a pure, total function. Both the push stream and the
//! stall watchdog route their observations through it, so every path into
//! a terminal step obeys the same rules:
//!
//! - a terminal prior state is returned unchanged;
//! - entering `failed` forces progress to 0;
//! - every other transition keeps progress non-decreasing.

use crate::progress::{ProgressState, Step};
use crate::progress_events::{ProgressEvent, RawEvent, RemoteStatus};

// ---------------------------------------------------------------------------
// Default messages
// ---------------------------------------------------------------------------

pub const MSG_STARTING: &str = "Starting analysis...";
pub const MSG_RESEARCH_START: &str = "Researching company information...";
pub const MSG_RESEARCH_COMPLETE: &str = "Research completed";
pub const MSG_SCENARIOS_START: &str = "Generating future scenarios...";
pub const MSG_SCENARIOS_COMPLETE: &str = "Scenarios generated";
pub const MSG_STRATEGIES_START: &str = "Generating strategic recommendations...";
pub const MSG_STRATEGIES_COMPLETE: &str = "Strategies generated";
pub const MSG_COMPLETED: &str = "Analysis completed successfully!";
pub const MSG_FAILED: &str = "Analysis failed";
pub const MSG_PROCESSING: &str = "Analysis in progress...";
pub const MSG_CONNECTED: &str = "Connected";

// ---------------------------------------------------------------------------
// Interpretation
// ---------------------------------------------------------------------------

/// Compute the state that follows `prior` once `event` is observed.
pub fn interpret(prior: &ProgressState, event: &ProgressEvent) -> ProgressState {
    if prior.is_terminal() {
        return prior.clone();
    }

    match event {
        ProgressEvent::AnalysisStart { message } => {
            advance(prior, Step::Initializing, 5, or_default(message, MSG_STARTING))
        }
        ProgressEvent::ResearchStart => advance(prior, Step::Research, 10, MSG_RESEARCH_START),
        ProgressEvent::ResearchComplete => {
            advance(prior, Step::Research, 30, MSG_RESEARCH_COMPLETE)
        }
        ProgressEvent::ScenariosStart => advance(prior, Step::Scenarios, 40, MSG_SCENARIOS_START),
        ProgressEvent::ScenariosComplete => {
            advance(prior, Step::Scenarios, 60, MSG_SCENARIOS_COMPLETE)
        }
        ProgressEvent::StrategiesStart => {
            advance(prior, Step::Strategies, 70, MSG_STRATEGIES_START)
        }
        ProgressEvent::StrategiesComplete => {
            advance(prior, Step::Strategies, 90, MSG_STRATEGIES_COMPLETE)
        }
        ProgressEvent::AnalysisComplete => completed(prior),
        ProgressEvent::AnalysisFailed { message } => failed(message),
        ProgressEvent::Status { status, message } => match status {
            Some(RemoteStatus::Completed) => completed(prior),
            Some(RemoteStatus::Failed) => failed(message),
            Some(RemoteStatus::Processing) => {
                advance(prior, Step::Processing, 10, or_default(message, MSG_PROCESSING))
            }
            _ => advance(prior, Step::Connected, 0, or_default(message, MSG_CONNECTED)),
        },
        ProgressEvent::StrategyProgress { message } | ProgressEvent::Other { message, .. } => {
            merge_message(prior, message)
        }
    }
}

/// Parse `raw` and interpret it. A malformed payload leaves `prior` as is.
pub fn interpret_raw(prior: &ProgressState, raw: &RawEvent) -> ProgressState {
    match ProgressEvent::parse(raw) {
        Ok(event) => interpret(prior, &event),
        Err(_) => prior.clone(),
    }
}

// ---- helpers ----

fn or_default<'a>(message: &'a Option<String>, default: &'a str) -> &'a str {
    message.as_deref().unwrap_or(default)
}

fn advance(prior: &ProgressState, step: Step, progress: u8, message: &str) -> ProgressState {
    ProgressState::new(step, message, progress.max(prior.progress))
}

fn completed(prior: &ProgressState) -> ProgressState {
    advance(prior, Step::Completed, 100, MSG_COMPLETED)
}

fn failed(message: &Option<String>) -> ProgressState {
    ProgressState::new(Step::Failed, or_default(message, MSG_FAILED), 0)
}

/// Step and progress carry over; only a present message replaces the old one.
fn merge_message(prior: &ProgressState, message: &Option<String>) -> ProgressState {
    match message {
        Some(m) => ProgressState {
            message: m.clone(),
            ..prior.clone()
        },
        None => prior.clone(),
    }
}
