//! Push-event vocabulary of the analysis progress stream.
//!
//! The backend emits server-sent events whose `event:` field is one of the
//! tags below and whose `data:` field is a JSON object with optional
//! `message` and `status` strings. [`ProgressEvent::parse`] turns a
//! [`RawEvent`] into the typed [`ProgressEvent`] union consumed by the
//! interpreter. Tags outside the known set are preserved as
//! [`ProgressEvent::Other`] rather than rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

pub const TAG_STATUS: &str = "status";
pub const TAG_ANALYSIS_START: &str = "analysis_start";
pub const TAG_RESEARCH_START: &str = "research_start";
pub const TAG_RESEARCH_COMPLETE: &str = "research_complete";
pub const TAG_SCENARIOS_START: &str = "scenarios_start";
pub const TAG_SCENARIOS_COMPLETE: &str = "scenarios_complete";
pub const TAG_STRATEGIES_START: &str = "strategies_start";
pub const TAG_STRATEGIES_COMPLETE: &str = "strategies_complete";
pub const TAG_STRATEGY_PROGRESS: &str = "strategy_progress";
pub const TAG_ANALYSIS_COMPLETE: &str = "analysis_complete";
pub const TAG_ANALYSIS_FAILED: &str = "analysis_failed";

/// SSE event name used when the server omits the `event:` field.
pub const TAG_DEFAULT_MESSAGE: &str = "message";

/// Every tag the stream subscribes to by name.
pub const KNOWN_TAGS: [&str; 11] = [
    TAG_STATUS,
    TAG_ANALYSIS_START,
    TAG_RESEARCH_START,
    TAG_RESEARCH_COMPLETE,
    TAG_SCENARIOS_START,
    TAG_SCENARIOS_COMPLETE,
    TAG_STRATEGIES_START,
    TAG_STRATEGIES_COMPLETE,
    TAG_STRATEGY_PROGRESS,
    TAG_ANALYSIS_COMPLETE,
    TAG_ANALYSIS_FAILED,
];

// ---------------------------------------------------------------------------
// RawEvent
// ---------------------------------------------------------------------------

/// An event exactly as it arrived from the push transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// SSE event name.
    pub tag: String,
    /// Unparsed `data:` text.
    pub data: String,
}

impl RawEvent {
    pub fn new(tag: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            data: data.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// RemoteStatus
// ---------------------------------------------------------------------------

/// Server-side status of an analysis job.
///
/// Appears both inside `status` push events and in the status endpoint
/// response. Unknown strings are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RemoteStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Other(String),
}

impl RemoteStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RemoteStatus::Pending => "pending",
            RemoteStatus::Processing => "processing",
            RemoteStatus::Completed => "completed",
            RemoteStatus::Failed => "failed",
            RemoteStatus::Other(s) => s,
        }
    }

    /// `completed` or `failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RemoteStatus::Completed | RemoteStatus::Failed)
    }
}

impl From<String> for RemoteStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "pending" => RemoteStatus::Pending,
            "processing" => RemoteStatus::Processing,
            "completed" => RemoteStatus::Completed,
            "failed" => RemoteStatus::Failed,
            _ => RemoteStatus::Other(value),
        }
    }
}

impl From<&str> for RemoteStatus {
    fn from(value: &str) -> Self {
        RemoteStatus::from(value.to_string())
    }
}

impl From<RemoteStatus> for String {
    fn from(value: RemoteStatus) -> Self {
        match value {
            RemoteStatus::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ProgressEvent
// ---------------------------------------------------------------------------

/// String-valued `field` of an event payload. Any valid JSON is accepted as
/// a payload; fields that are absent or not strings read as `None`.
fn string_field<'a>(payload: &'a Value, field: &str) -> Option<&'a str> {
    payload.get(field).and_then(Value::as_str)
}

/// A parsed progress event.
///
/// `message` fields are `None` when the payload omitted the field or sent
/// an empty string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    AnalysisStart { message: Option<String> },
    ResearchStart,
    ResearchComplete,
    ScenariosStart,
    ScenariosComplete,
    StrategiesStart,
    StrategiesComplete,
    /// Intermediate strategy-generation note; only the message changes.
    StrategyProgress { message: Option<String> },
    AnalysisComplete,
    AnalysisFailed { message: Option<String> },
    /// Status broadcast carrying the job's server-side status.
    Status {
        status: Option<RemoteStatus>,
        message: Option<String>,
    },
    /// Any tag outside [`KNOWN_TAGS`].
    Other { tag: String, message: Option<String> },
}

impl ProgressEvent {
    /// Parse a raw push event.
    ///
    /// Returns `Err` when the payload is not a JSON object of the expected
    /// shape. Callers log the error and drop the event.
    pub fn parse(raw: &RawEvent) -> Result<Self, CoreError> {
        let payload: Value =
            serde_json::from_str(&raw.data).map_err(|source| CoreError::MalformedPayload {
                tag: raw.tag.clone(),
                source,
            })?;

        let message = string_field(&payload, "message")
            .filter(|m| !m.is_empty())
            .map(str::to_owned);

        let event = match raw.tag.as_str() {
            TAG_STATUS => ProgressEvent::Status {
                status: string_field(&payload, "status").map(RemoteStatus::from),
                message,
            },
            TAG_ANALYSIS_START => ProgressEvent::AnalysisStart { message },
            TAG_RESEARCH_START => ProgressEvent::ResearchStart,
            TAG_RESEARCH_COMPLETE => ProgressEvent::ResearchComplete,
            TAG_SCENARIOS_START => ProgressEvent::ScenariosStart,
            TAG_SCENARIOS_COMPLETE => ProgressEvent::ScenariosComplete,
            TAG_STRATEGIES_START => ProgressEvent::StrategiesStart,
            TAG_STRATEGIES_COMPLETE => ProgressEvent::StrategiesComplete,
            TAG_STRATEGY_PROGRESS => ProgressEvent::StrategyProgress { message },
            TAG_ANALYSIS_COMPLETE => ProgressEvent::AnalysisComplete,
            TAG_ANALYSIS_FAILED => ProgressEvent::AnalysisFailed { message },
            other => ProgressEvent::Other {
                tag: other.to_string(),
                message,
            },
        };

        Ok(event)
    }

    /// A synthetic `status` event, as produced by a fallback status check.
    pub fn status(status: RemoteStatus, message: Option<String>) -> Self {
        ProgressEvent::Status {
            status: Some(status),
            message: message.filter(|m| !m.is_empty()),
        }
    }

    /// The SSE tag this event corresponds to.
    pub fn tag(&self) -> &str {
        match self {
            ProgressEvent::AnalysisStart { .. } => TAG_ANALYSIS_START,
            ProgressEvent::ResearchStart => TAG_RESEARCH_START,
            ProgressEvent::ResearchComplete => TAG_RESEARCH_COMPLETE,
            ProgressEvent::ScenariosStart => TAG_SCENARIOS_START,
            ProgressEvent::ScenariosComplete => TAG_SCENARIOS_COMPLETE,
            ProgressEvent::StrategiesStart => TAG_STRATEGIES_START,
            ProgressEvent::StrategiesComplete => TAG_STRATEGIES_COMPLETE,
            ProgressEvent::StrategyProgress { .. } => TAG_STRATEGY_PROGRESS,
            ProgressEvent::AnalysisComplete => TAG_ANALYSIS_COMPLETE,
            ProgressEvent::AnalysisFailed { .. } => TAG_ANALYSIS_FAILED,
            ProgressEvent::Status { .. } => TAG_STATUS,
            ProgressEvent::Other { tag, .. } => tag,
        }
    }
}
