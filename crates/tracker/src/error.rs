//! Error types shared across the tracker components.

use serde::Serialize;

/// An error surfaced to the consumer alongside the progress state.
///
/// Only these two conditions ever become visible; parse failures and
/// fallback status-check failures are absorbed and logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum TrackerError {
    /// The push stream could not be kept open (retry budget exhausted or
    /// the server closed it before a terminal event).
    #[error("Connection error: {0}")]
    Transport(String),

    /// The job itself reported failure.
    #[error("{0}")]
    TerminalFailure(String),
}

/// Failures of the push transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The HTTP request for the stream could not be sent.
    #[error("Failed to open event stream: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered the stream request with a non-2xx status.
    #[error("Event stream rejected with HTTP {status}")]
    Status { status: u16 },

    /// The stream broke after it was opened.
    #[error("Event stream error: {0}")]
    Stream(String),
}

/// Invalid configuration values read from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}
