//! Telemetry for the daemon
//!
//! This module provides:
//! - Structured logging with pretty and JSON formatters
//! - An optional rolling log file
//! - Prometheus collectors fed by the sync engine

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bo_sync::{RunMetrics, SyncError};
use bo_sync_core::config::LoggingSettings;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

/// Prometheus registry and collectors
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: Registry,
    started_at: Instant,

    // Run metrics
    pub runs_started_total: IntCounter,
    pub runs_total: IntCounterVec,
    pub runs_rejected_total: IntCounter,
    pub run_duration_seconds: HistogramVec,
    pub last_run_count: IntGauge,
    pub sync_in_progress: IntGauge,

    // Step metrics
    pub artifacts_written_total: IntCounterVec,
    pub step_duration_seconds: HistogramVec,

    pub uptime_seconds: IntGauge,
}

impl DaemonMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let runs_started_total =
            IntCounter::new("bo_sync_runs_started_total", "Synchronization runs started")?;

        let runs_total = IntCounterVec::new(
            Opts::new("bo_sync_runs_total", "Finished synchronization runs"),
            &["status"],
        )?;

        let runs_rejected_total = IntCounter::new(
            "bo_sync_runs_rejected_total",
            "Triggers rejected because a run was already in progress",
        )?;

        let run_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "bo_sync_run_duration_seconds",
                "Duration of synchronization runs in seconds",
            )
            .buckets(vec![1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0]),
            &["status"],
        )?;

        let last_run_count = IntGauge::new(
            "bo_sync_last_run_count",
            "Objects written by the last successful run",
        )?;

        let sync_in_progress =
            IntGauge::new("bo_sync_in_progress", "1 while a run is in flight")?;

        let artifacts_written_total = IntCounterVec::new(
            Opts::new(
                "bo_sync_artifacts_written_total",
                "Objects written to the target environment",
            ),
            &["kind"],
        )?;

        let step_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "bo_sync_step_duration_seconds",
                "Duration of a single object-type step in seconds",
            ),
            &["kind"],
        )?;

        let uptime_seconds = IntGauge::new("bo_sync_uptime_seconds", "Daemon uptime in seconds")?;

        registry.register(Box::new(runs_started_total.clone()))?;
        registry.register(Box::new(runs_total.clone()))?;
        registry.register(Box::new(runs_rejected_total.clone()))?;
        registry.register(Box::new(run_duration_seconds.clone()))?;
        registry.register(Box::new(last_run_count.clone()))?;
        registry.register(Box::new(sync_in_progress.clone()))?;
        registry.register(Box::new(artifacts_written_total.clone()))?;
        registry.register(Box::new(step_duration_seconds.clone()))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry,
            started_at: Instant::now(),
            runs_started_total,
            runs_total,
            runs_rejected_total,
            run_duration_seconds,
            last_run_count,
            sync_in_progress,
            artifacts_written_total,
            step_duration_seconds,
            uptime_seconds,
        })
    }

    /// Text exposition of every collector.
    pub fn render(&self) -> Result<String> {
        self.uptime_seconds
            .set(self.started_at.elapsed().as_secs() as i64);
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl RunMetrics for DaemonMetrics {
    fn record_step(&self, kind: &str, written: usize, elapsed: Duration) {
        self.artifacts_written_total
            .with_label_values(&[kind])
            .inc_by(written as u64);
        self.step_duration_seconds
            .with_label_values(&[kind])
            .observe(elapsed.as_secs_f64());
    }

    fn run_started(&self, _run_id: Uuid) {
        self.runs_started_total.inc();
        self.sync_in_progress.set(1);
    }

    fn run_finished(&self, _run_id: Uuid, outcome: Result<usize, &SyncError>, elapsed: Duration) {
        let status = match outcome {
            Ok(count) => {
                self.last_run_count.set(count as i64);
                "succeeded"
            }
            Err(_) => "failed",
        };
        self.runs_total.with_label_values(&[status]).inc();
        self.run_duration_seconds
            .with_label_values(&[status])
            .observe(elapsed.as_secs_f64());
        self.sync_in_progress.set(0);
    }

    fn run_rejected(&self) {
        self.runs_rejected_total.inc();
    }
}

/// Installs the global subscriber. The returned guard flushes the log file
/// and must live as long as the process.
pub fn initialize_logging(settings: &LoggingSettings) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directive(&settings.level)))?;

    let console_layer = if settings.json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    let (file_layer, guard) = match &settings.file {
        Some(log_path) => {
            let directory = log_path.parent().unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(directory)?;
            let file_name = log_path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("bo-sync.log"));

            let (non_blocking, guard) =
                tracing_appender::non_blocking(rolling::daily(directory, file_name));
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .json()
                .with_current_span(true)
                .with_span_list(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    info!(level = %settings.level, json = settings.json, "Logging initialized");
    Ok(guard)
}

/// A bare level applies to the workspace crates only.
fn filter_directive(level: &str) -> String {
    let level = level.trim().to_ascii_lowercase();
    if level.contains('=') || level.contains(',') {
        return level;
    }
    ["bo_sync", "bo_sync_core", "bo_sync_daemon", "tower_http"]
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",")
}

pub async fn metrics_handler(State(metrics): State<DaemonMetrics>) -> Response {
    match metrics.render() {
        Ok(output) => (StatusCode::OK, output).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_lifecycle_is_exported() {
        let metrics = DaemonMetrics::new().unwrap();
        let run = Uuid::new_v4();

        metrics.run_started(run);
        assert_eq!(metrics.sync_in_progress.get(), 1);
        metrics.record_step("Report", 4, Duration::from_millis(20));
        metrics.run_finished(run, Ok(4), Duration::from_secs(2));
        metrics.run_rejected();

        assert_eq!(metrics.sync_in_progress.get(), 0);
        assert_eq!(metrics.last_run_count.get(), 4);
        assert_eq!(metrics.runs_total.with_label_values(&["succeeded"]).get(), 1);
        assert_eq!(
            metrics
                .artifacts_written_total
                .with_label_values(&["Report"])
                .get(),
            4
        );

        let text = metrics.render().unwrap();
        assert!(text.contains("bo_sync_runs_started_total 1"));
        assert!(text.contains("bo_sync_runs_rejected_total 1"));
        assert!(text.contains("bo_sync_run_duration_seconds_bucket"));
    }

    #[test]
    fn test_failed_run_keeps_last_count() {
        let metrics = DaemonMetrics::new().unwrap();
        let run = Uuid::new_v4();
        metrics.run_finished(run, Ok(7), Duration::ZERO);
        metrics.run_finished(run, Err(&SyncError::validation("boom")), Duration::ZERO);

        assert_eq!(metrics.last_run_count.get(), 7);
        assert_eq!(metrics.runs_total.with_label_values(&["failed"]).get(), 1);
    }

    #[test]
    fn test_filter_directive() {
        assert_eq!(
            filter_directive("DEBUG"),
            "bo_sync=debug,bo_sync_core=debug,bo_sync_daemon=debug,tower_http=debug"
        );
        assert_eq!(filter_directive("bo_sync=trace"), "bo_sync=trace");
    }
}
