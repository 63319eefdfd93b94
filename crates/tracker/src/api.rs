//! REST client for the analysis backend.
//!
//! Wraps the job-creation, job-detail, and status endpoints using
//! [`reqwest`]. Only the status endpoint is used by the tracker itself
//! (through the [`StatusSource`] trait); the others are exposed for
//! consumers that create jobs or fetch final results.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use foresight_core::progress_events::RemoteStatus;
use foresight_core::types::{DbId, JobId, Timestamp};

use crate::config::ClientConfig;

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

/// An analysis job as returned by the list, create, and status endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub id: JobId,
    pub company_name: String,
    pub status: RemoteStatus,
    #[serde(default)]
    pub company_context: Option<String>,
    /// Raw timestamp as sent by the backend (offset may be absent).
    pub created_at: String,
    pub updated_at: String,
}

impl Analysis {
    /// `updated_at` as UTC, if the backend sent a recognisable format.
    pub fn updated_at_utc(&self) -> Option<Timestamp> {
        parse_timestamp(&self.updated_at)
    }
}

/// One generated future scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: DbId,
    pub scenario_number: i32,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub timeline: Option<String>,
    #[serde(default)]
    pub key_assumptions: Option<String>,
    #[serde(default)]
    pub likelihood: Option<f64>,
}

/// One strategic recommendation for a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: DbId,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub expected_impact: Option<String>,
    #[serde(default)]
    pub key_risks: Option<String>,
}

/// Full job record from the job-detail endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisDetail {
    #[serde(flatten)]
    pub analysis: Analysis,
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
    /// Strategies keyed by scenario title.
    #[serde(default)]
    pub strategies: BTreeMap<String, Vec<Strategy>>,
}

impl AnalysisDetail {
    pub fn strategy_count(&self) -> usize {
        self.strategies.values().map(Vec::len).sum()
    }

    /// Strategies generated for `scenario`, empty if none were stored.
    pub fn strategies_for(&self, scenario: &Scenario) -> &[Strategy] {
        self.strategies
            .get(&scenario.title)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from the analysis REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, decoding).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("Analysis API error ({status}): {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

// ---------------------------------------------------------------------------
// StatusSource
// ---------------------------------------------------------------------------

/// Point-in-time status read for a job, used by the stall watchdog.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, job_id: JobId) -> Result<RemoteStatus, ApiError>;
}

// ---------------------------------------------------------------------------
// AnalysisApi
// ---------------------------------------------------------------------------

/// HTTP client for the analysis backend.
pub struct AnalysisApi {
    client: reqwest::Client,
    api_url: String,
}

impl AnalysisApi {
    /// Create a client with its own connection pool and request timeout.
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(client, config.api_url.clone()))
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self { client, api_url }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Start a new analysis for `company_name`.
    ///
    /// Sends `POST /api/analyses`; the backend queues the pipeline and
    /// returns the `pending` job.
    pub async fn create_analysis(&self, company_name: &str) -> Result<Analysis, ApiError> {
        let body = serde_json::json!({ "company_name": company_name });

        let response = self
            .client
            .post(format!("{}/api/analyses", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// List all analyses, newest first.
    pub async fn list_analyses(&self) -> Result<Vec<Analysis>, ApiError> {
        let response = self
            .client
            .get(format!("{}/api/analyses", self.api_url))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Fetch the full job record including scenarios and strategies.
    pub async fn get_analysis(&self, job_id: JobId) -> Result<AnalysisDetail, ApiError> {
        let response = self
            .client
            .get(format!("{}/api/analyses/{}", self.api_url, job_id))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Fetch the current job row from the polling fallback endpoint.
    pub async fn get_status(&self, job_id: JobId) -> Result<Analysis, ApiError> {
        let response = self
            .client
            .get(format!("{}/api/analyses/{}/status", self.api_url, job_id))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code, otherwise capture the
    /// status and body text in an [`ApiError::Status`].
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl StatusSource for AnalysisApi {
    async fn fetch_status(&self, job_id: JobId) -> Result<RemoteStatus, ApiError> {
        Ok(self.get_status(job_id).await?.status)
    }
}

/// Accept RFC 3339 as well as the offset-less ISO form the backend emits for
/// naive UTC datetimes.
fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}
