//! Scripted collaborators for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use tokio::time::Instant;

use foresight_core::progress_events::{RawEvent, RemoteStatus};
use foresight_core::types::JobId;

use crate::api::{ApiError, StatusSource};
use crate::error::TransportError;
use crate::transport::{EventStream, EventTransport};

/// Let spawned tasks run until they block, without advancing time.
pub(crate) async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

// ---------------------------------------------------------------------------
// ScriptedTransport
// ---------------------------------------------------------------------------

type Item = Result<RawEvent, TransportError>;

enum Script {
    Fail(String),
    Reject(u16),
    Stream(mpsc::UnboundedReceiver<Item>),
}

/// Answers each `open` with the next scripted outcome; once the script is
/// exhausted every open yields a stream that never produces anything.
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Script>>,
    opens: Mutex<Vec<(JobId, Instant)>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            opens: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn push_failure(&self, reason: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Script::Fail(reason.to_string()));
    }

    /// The server answers the stream request with a non-2xx `status`.
    pub(crate) fn push_rejection(&self, status: u16) {
        self.script.lock().unwrap().push_back(Script::Reject(status));
    }

    pub(crate) fn push_stream(&self) -> Feed {
        let (tx, rx) = mpsc::unbounded();
        self.script.lock().unwrap().push_back(Script::Stream(rx));
        Feed(tx)
    }

    pub(crate) fn open_count(&self) -> usize {
        self.opens.lock().unwrap().len()
    }

    pub(crate) fn opened_jobs(&self) -> Vec<JobId> {
        self.opens.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }

    pub(crate) fn open_times(&self) -> Vec<Instant> {
        self.opens.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }
}

#[async_trait]
impl EventTransport for ScriptedTransport {
    async fn open(&self, job_id: JobId) -> Result<EventStream, TransportError> {
        self.opens.lock().unwrap().push((job_id, Instant::now()));
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Script::Fail(reason)) => Err(TransportError::Stream(reason)),
            Some(Script::Reject(status)) => Err(TransportError::Status { status }),
            Some(Script::Stream(rx)) => Ok(rx.boxed()),
            None => Ok(futures::stream::pending::<Item>().boxed()),
        }
    }
}

/// Sending half of a scripted stream. Dropping it ends the stream cleanly.
pub(crate) struct Feed(mpsc::UnboundedSender<Item>);

impl Feed {
    /// Deliver an event; silently dropped if the stream is gone.
    pub(crate) fn send(&self, event: RawEvent) {
        let _ = self.0.unbounded_send(Ok(event));
    }

    pub(crate) fn fail(&self, reason: &str) {
        let _ = self
            .0
            .unbounded_send(Err(TransportError::Stream(reason.to_string())));
    }

    pub(crate) fn end(self) {}

    /// Whether the consumer dropped the stream.
    pub(crate) fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

// ---------------------------------------------------------------------------
// ScriptedStatus
// ---------------------------------------------------------------------------

/// Answers status checks from a queue; `processing` once it runs dry.
pub(crate) struct ScriptedStatus {
    results: Mutex<VecDeque<Result<RemoteStatus, ApiError>>>,
    calls: Mutex<Vec<Instant>>,
    latency: Mutex<Duration>,
}

impl ScriptedStatus {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
        })
    }

    pub(crate) fn push(&self, result: Result<RemoteStatus, ApiError>) {
        self.results.lock().unwrap().push_back(result);
    }

    pub(crate) fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub(crate) fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusSource for ScriptedStatus {
    async fn fetch_status(&self, _job_id: JobId) -> Result<RemoteStatus, ApiError> {
        self.calls.lock().unwrap().push(Instant::now());
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let next = self.results.lock().unwrap().pop_front();
        next.unwrap_or(Ok(RemoteStatus::Processing))
    }
}
