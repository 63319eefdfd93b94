//! Tracker and HTTP client configuration loaded from environment variables.
//!
//! All fields have defaults suitable for a local backend. Override them via
//! the environment (the binary also reads a `.env` file via `dotenvy`).

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::reconnect::{ReconnectPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS};

/// Default interval between stall-watchdog ticks.
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(5);

/// Default silence after which the watchdog starts checking job status.
pub const DEFAULT_STALL_THRESHOLD: Duration = Duration::from_secs(15);

/// Default analysis backend base URL.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Default timeout for one-shot HTTP requests, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// TrackerConfig
// ---------------------------------------------------------------------------

/// Timing parameters of a tracker subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Reconnect attempt `n` waits `n` times this delay.
    pub reconnect_base_delay: Duration,
    /// Consecutive reconnect attempts allowed before surfacing an error.
    pub max_reconnect_attempts: u32,
    /// Watchdog tick period.
    pub watchdog_interval: Duration,
    /// Silence needed before the watchdog issues a status check.
    pub stall_threshold: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay: DEFAULT_BASE_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_ATTEMPTS,
            watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
            stall_threshold: DEFAULT_STALL_THRESHOLD,
        }
    }
}

impl TrackerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default |
    /// |---------------------------|---------|
    /// | `RECONNECT_BASE_DELAY_MS` | `1000`  |
    /// | `MAX_RECONNECT_ATTEMPTS`  | `5`     |
    /// | `WATCHDOG_INTERVAL_SECS`  | `5`     |
    /// | `STALL_THRESHOLD_SECS`    | `15`    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let base_ms: u64 = parse_or(
            &lookup,
            "RECONNECT_BASE_DELAY_MS",
            defaults.reconnect_base_delay.as_millis() as u64,
        )?;
        let max_reconnect_attempts =
            parse_or(&lookup, "MAX_RECONNECT_ATTEMPTS", defaults.max_reconnect_attempts)?;
        let interval_secs: u64 = parse_or(
            &lookup,
            "WATCHDOG_INTERVAL_SECS",
            defaults.watchdog_interval.as_secs(),
        )?;
        let threshold_secs: u64 = parse_or(
            &lookup,
            "STALL_THRESHOLD_SECS",
            defaults.stall_threshold.as_secs(),
        )?;

        if interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "WATCHDOG_INTERVAL_SECS",
                value: "0".into(),
            });
        }

        Ok(Self {
            reconnect_base_delay: Duration::from_millis(base_ms),
            max_reconnect_attempts,
            watchdog_interval: Duration::from_secs(interval_secs),
            stall_threshold: Duration::from_secs(threshold_secs),
        })
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: self.reconnect_base_delay,
            max_attempts: self.max_reconnect_attempts,
        }
    }
}

// ---------------------------------------------------------------------------
// ClientConfig
// ---------------------------------------------------------------------------

/// Where the analysis backend lives and how long one-shot calls may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL without a trailing slash, e.g. `http://localhost:8000`.
    pub api_url: String,
    /// Timeout for status / detail / create requests. Not applied to the
    /// long-lived event stream.
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl ClientConfig {
    /// | Env Var                | Default                 |
    /// |------------------------|-------------------------|
    /// | `ANALYSIS_API_URL`     | `http://localhost:8000` |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_url = lookup("ANALYSIS_API_URL")
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let timeout_secs: u64 =
            parse_or(&lookup, "REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;

        Ok(Self {
            api_url,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

// ---- private helpers ----

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            value: raw.clone(),
        }),
        None => Ok(default),
    }
}
