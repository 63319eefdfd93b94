//! Push transport for analysis progress events.
//!
//! [`SseTransport`] opens `GET /api/analyses/{id}/stream` and frames the
//! `text/event-stream` body with [`eventsource_stream`]. Each SSE message
//! becomes a [`RawEvent`]; comment lines (server keepalives) never surface.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};

use foresight_core::progress_events::{RawEvent, TAG_DEFAULT_MESSAGE};
use foresight_core::types::JobId;

use crate::config::ClientConfig;
use crate::error::TransportError;

/// An open push stream. Ends when the server closes the connection.
pub type EventStream = BoxStream<'static, Result<RawEvent, TransportError>>;

/// Opens a per-job push stream.
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Resolve once the stream is established (response headers received).
    async fn open(&self, job_id: JobId) -> Result<EventStream, TransportError>;
}

/// Server-sent events transport over [`reqwest`].
pub struct SseTransport {
    client: reqwest::Client,
    api_url: String,
}

impl SseTransport {
    /// Build a transport for the configured backend.
    ///
    /// Only the connect phase is bounded by the request timeout; the stream
    /// itself may stay open for as long as the job runs.
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(client, config.api_url.clone()))
    }

    /// Reuse an existing [`reqwest::Client`]. It must not carry a total
    /// request timeout or long streams will be cut off.
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self { client, api_url }
    }

    pub fn stream_url(&self, job_id: JobId) -> String {
        format!("{}/api/analyses/{}/stream", self.api_url, job_id)
    }
}

#[async_trait]
impl EventTransport for SseTransport {
    async fn open(&self, job_id: JobId) -> Result<EventStream, TransportError> {
        let url = self.stream_url(job_id);

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
            });
        }

        tracing::debug!(job_id, url = %url, "Event stream response received");

        let events = response
            .bytes_stream()
            .eventsource()
            .map(|item| match item {
                Ok(event) => {
                    let tag = if event.event.is_empty() {
                        TAG_DEFAULT_MESSAGE.to_string()
                    } else {
                        event.event
                    };
                    Ok(RawEvent::new(tag, event.data))
                }
                Err(e) => Err(TransportError::Stream(e.to_string())),
            });

        Ok(events.boxed())
    }
}
