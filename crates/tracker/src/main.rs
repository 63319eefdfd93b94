//! `foresight-track` -- follow an analysis job from the command line.
//!
//! Starts a new analysis (or attaches to an existing one), tracks its
//! progress over the SSE stream with the polling fallback, and logs every
//! published snapshot until the job completes or fails.
//!
//! # Environment variables
//!
//! | Variable                  | Required | Default                 | Description                       |
//! |---------------------------|----------|-------------------------|-----------------------------------|
//! | `ANALYSIS_ID`             | one of   | --                      | Existing job to track             |
//! | `COMPANY_NAME`            | one of   | --                      | Start a new analysis for company  |
//! | `ANALYSIS_API_URL`        | no       | `http://localhost:8000` | Backend base URL                  |
//! | `REQUEST_TIMEOUT_SECS`    | no       | `30`                    | Timeout for one-shot requests     |
//! | `RECONNECT_BASE_DELAY_MS` | no       | `1000`                  | Linear reconnect delay unit       |
//! | `MAX_RECONNECT_ATTEMPTS`  | no       | `5`                     | Reconnect budget                  |
//! | `WATCHDOG_INTERVAL_SECS`  | no       | `5`                     | Stall watchdog tick period        |
//! | `STALL_THRESHOLD_SECS`    | no       | `15`                    | Silence before a status check     |
//! | `LOG_FORMAT`              | no       | `text`                  | `json` for structured log output  |

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use foresight_core::progress::Step;
use foresight_core::types::JobId;
use foresight_tracker::api::AnalysisApi;
use foresight_tracker::config::{ClientConfig, TrackerConfig};
use foresight_tracker::error::TrackerError;
use foresight_tracker::tracker::{ProgressSnapshot, ProgressTracker};
use foresight_tracker::transport::SseTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let client_config = ClientConfig::from_env()?;
    let tracker_config = TrackerConfig::from_env()?;

    tracing::info!(
        api_url = %client_config.api_url,
        watchdog_interval_secs = tracker_config.watchdog_interval.as_secs(),
        stall_threshold_secs = tracker_config.stall_threshold.as_secs(),
        "Starting foresight-track",
    );

    let api = Arc::new(AnalysisApi::new(&client_config)?);
    let job_id = resolve_job(&api).await?;

    let transport = Arc::new(SseTransport::new(&client_config)?);
    let mut tracker = ProgressTracker::new(transport, api.clone(), tracker_config);
    let mut updates = tracker.watch();
    tracker.subscribe(job_id);

    let last = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(job_id, "Interrupted, detaching");
                return Ok(());
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    anyhow::bail!("Tracker shut down unexpectedly");
                }
            }
        }

        let snapshot = updates.borrow_and_update().clone();
        if snapshot.job_id != Some(job_id) {
            continue;
        }
        log_snapshot(&snapshot);

        if snapshot.state.is_terminal() {
            break snapshot;
        }
        // A dead stream with nothing known to be running leaves the
        // watchdog nothing to poll for.
        if let Some(TrackerError::Transport(reason)) = &snapshot.error {
            if !snapshot.state.step.is_in_flight() {
                anyhow::bail!("Lost connection to analysis {job_id}: {reason}");
            }
        }
    };

    tracker.unsubscribe();

    match last.state.step {
        Step::Completed => {
            let detail = api
                .get_analysis(job_id)
                .await
                .with_context(|| format!("Failed to fetch results for analysis {job_id}"))?;
            tracing::info!(
                job_id,
                company = %detail.analysis.company_name,
                scenarios = detail.scenarios.len(),
                strategies = detail.strategy_count(),
                "Analysis results ready",
            );
            Ok(())
        }
        _ => anyhow::bail!("Analysis {job_id} failed: {}", last.state.message),
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "foresight_tracker=info,foresight_track=info".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Pick the job to track: `ANALYSIS_ID` if set, otherwise start a new
/// analysis for `COMPANY_NAME`.
async fn resolve_job(api: &AnalysisApi) -> anyhow::Result<JobId> {
    if let Ok(raw) = std::env::var("ANALYSIS_ID") {
        let job_id: JobId = raw
            .trim()
            .parse()
            .with_context(|| format!("ANALYSIS_ID must be an integer, got '{raw}'"))?;
        tracing::info!(job_id, "Tracking existing analysis");
        return Ok(job_id);
    }

    let company = std::env::var("COMPANY_NAME")
        .context("Either ANALYSIS_ID or COMPANY_NAME must be set")?;
    let analysis = api
        .create_analysis(company.trim())
        .await
        .context("Failed to start analysis")?;
    tracing::info!(
        job_id = analysis.id,
        company = %analysis.company_name,
        status = %analysis.status,
        "Analysis created",
    );
    Ok(analysis.id)
}

fn log_snapshot(snapshot: &ProgressSnapshot) {
    let state = &snapshot.state;
    match &snapshot.error {
        Some(error) => tracing::warn!(
            step = state.step.label(),
            progress = state.progress,
            error = %error,
            "{}",
            state.message,
        ),
        None => tracing::info!(
            step = state.step.label(),
            progress = state.progress,
            "{}",
            state.message,
        ),
    }
}
