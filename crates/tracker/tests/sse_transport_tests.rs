//! Integration tests for the SSE transport and for a full tracker
//! subscription running over real HTTP.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use futures::StreamExt;
use serde_json::json;
use tokio::sync::watch;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use foresight_core::interpreter::MSG_COMPLETED;
use foresight_core::progress::{ProgressState, Step};
use foresight_core::progress_events::RawEvent;
use foresight_tracker::api::AnalysisApi;
use foresight_tracker::config::{ClientConfig, TrackerConfig};
use foresight_tracker::error::{TrackerError, TransportError};
use foresight_tracker::tracker::{ProgressSnapshot, ProgressTracker};
use foresight_tracker::transport::{EventTransport, SseTransport};

const PIPELINE: &str = "\
: keepalive\n\n\
event: status\ndata: {\"status\": \"processing\", \"message\": \"Analysis queued\"}\n\n\
event: analysis_start\ndata: {\"message\": \"Starting analysis for Acme\"}\n\n\
event: research_start\ndata: {}\n\n\
event: research_complete\ndata: {}\n\n\
: keepalive\n\n\
event: scenarios_start\ndata: {}\n\n\
event: scenarios_complete\ndata: {}\n\n\
event: strategies_start\ndata: {}\n\n\
event: strategy_progress\ndata: {\"message\": \"Strategies for scenario 1 of 3\"}\n\n\
event: strategies_complete\ndata: {}\n\n\
event: analysis_complete\ndata: {\"message\": \"Done\"}\n\n";

fn client_config(server: &MockServer) -> ClientConfig {
    ClientConfig {
        api_url: server.uri(),
        ..ClientConfig::default()
    }
}

async fn mount_stream(server: &MockServer, job_id: i64, body: &'static str) {
    Mock::given(method("GET"))
        .and(path(format!("/api/analyses/{job_id}/stream")))
        .and(header("accept", "text/event-stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("cache-control", "no-cache")
                .set_body_raw(body, "text/event-stream"),
        )
        .mount(server)
        .await;
}

async fn wait_for_terminal(rx: &mut watch::Receiver<ProgressSnapshot>) -> ProgressSnapshot {
    let snapshot = tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|s| s.state.is_terminal()),
    )
    .await
    .expect("analysis did not reach a terminal state in time")
    .expect("tracker dropped");
    snapshot.clone()
}

// ---------------------------------------------------------------------------
// SseTransport
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stream_yields_named_events_and_skips_comments() {
    let server = MockServer::start().await;
    mount_stream(&server, 3, PIPELINE).await;

    let transport = SseTransport::new(&client_config(&server)).unwrap();
    let events: Vec<RawEvent> = transport
        .open(3)
        .await
        .unwrap()
        .map(|item| item.unwrap())
        .collect()
        .await;

    let tags: Vec<&str> = events.iter().map(|e| e.tag.as_str()).collect();
    assert_eq!(
        tags,
        vec![
            "status",
            "analysis_start",
            "research_start",
            "research_complete",
            "scenarios_start",
            "scenarios_complete",
            "strategies_start",
            "strategy_progress",
            "strategies_complete",
            "analysis_complete",
        ]
    );
    assert_eq!(events[1].data, r#"{"message": "Starting analysis for Acme"}"#);
}

#[tokio::test]
async fn unnamed_event_uses_default_tag() {
    let server = MockServer::start().await;
    mount_stream(&server, 4, "data: {\"message\": \"hello\"}\n\n").await;

    let transport = SseTransport::new(&client_config(&server)).unwrap();
    let events: Vec<_> = transport.open(4).await.unwrap().collect().await;

    assert_eq!(events.len(), 1);
    assert_matches!(&events[0], Ok(RawEvent { tag, .. }) if tag == "message");
}

#[tokio::test]
async fn rejected_stream_reports_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/analyses/8/stream"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let transport = SseTransport::new(&client_config(&server)).unwrap();
    let result = transport.open(8).await;
    assert_matches!(result.err(), Some(TransportError::Status { status: 503 }));
}

// ---------------------------------------------------------------------------
// ProgressTracker over HTTP
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tracker_follows_pipeline_to_completion() {
    let server = MockServer::start().await;
    mount_stream(&server, 12, PIPELINE).await;

    let config = client_config(&server);
    let transport = Arc::new(SseTransport::new(&config).unwrap());
    let api = Arc::new(AnalysisApi::new(&config).unwrap());
    let mut tracker = ProgressTracker::new(transport, api, TrackerConfig::default());
    let mut rx = tracker.watch();

    tracker.subscribe(12);
    let done = wait_for_terminal(&mut rx).await;

    assert_eq!(done.job_id, Some(12));
    assert_eq!(done.state, ProgressState::new(Step::Completed, MSG_COMPLETED, 100));
    assert!(done.error.is_none());
}

#[tokio::test]
async fn missing_stream_is_reported_after_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/analyses/99/stream"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let config = client_config(&server);
    let transport = Arc::new(SseTransport::new(&config).unwrap());
    let api = Arc::new(AnalysisApi::new(&config).unwrap());
    let mut tracker = ProgressTracker::new(transport, api, TrackerConfig::default());
    let mut rx = tracker.watch();

    tracker.subscribe(99);
    let failed = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.error.is_some()))
        .await
        .expect("no error surfaced in time")
        .expect("tracker dropped")
        .clone();

    assert_matches!(failed.error, Some(TrackerError::Transport(ref reason)) if reason.contains("404"));
    assert_eq!(failed.state.step, Step::Idle);
    // Give a retry, if one were scheduled, the chance to fire.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    server.verify().await;
}

#[tokio::test]
async fn ambiguous_close_is_resolved_by_status_check() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        21,
        "event: analysis_start\ndata: {}\n\nevent: research_start\ndata: {}\n\n",
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/api/analyses/21/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 21,
            "company_name": "Acme",
            "status": "completed",
            "created_at": "2025-03-01T12:00:00",
            "updated_at": "2025-03-01T12:09:00"
        })))
        .mount(&server)
        .await;

    let config = client_config(&server);
    let tracker_config = TrackerConfig {
        watchdog_interval: Duration::from_millis(50),
        stall_threshold: Duration::from_millis(100),
        ..TrackerConfig::default()
    };
    let transport = Arc::new(SseTransport::new(&config).unwrap());
    let api = Arc::new(AnalysisApi::new(&config).unwrap());
    let mut tracker = ProgressTracker::new(transport, api, tracker_config);
    let mut rx = tracker.watch();

    tracker.subscribe(21);

    let closed = tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|s| s.error.is_some() || s.state.is_terminal()),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    if !closed.state.is_terminal() {
        assert_matches!(closed.error, Some(TrackerError::Transport(_)));
        assert_eq!(closed.state.step, Step::Research);
    }

    let done = wait_for_terminal(&mut rx).await;
    assert_eq!(done.state.step, Step::Completed);
    assert_eq!(done.state.progress, 100);
    assert!(done.error.is_none());
}
