//! Run and step statistics

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::error::SyncError;

/// Observer of engine activity. The daemon exports these to Prometheus.
pub trait RunMetrics: Send + Sync {
    /// One reconcile step finished with `written` objects.
    fn record_step(&self, kind: &str, written: usize, elapsed: Duration);

    fn run_started(&self, _run_id: Uuid) {}

    fn run_finished(
        &self,
        _run_id: Uuid,
        _outcome: Result<usize, &SyncError>,
        _elapsed: Duration,
    ) {
    }

    /// A trigger arrived while a run was in flight.
    fn run_rejected(&self) {}
}

/// Aggregated numbers for one artifact kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepStats {
    pub steps: usize,
    pub written: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTotals {
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub rejected: u64,
}

/// In-process collector, used by the CLI summary and in tests.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    steps: Mutex<BTreeMap<String, StepStats>>,
    runs: Mutex<RunTotals>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> BTreeMap<String, StepStats> {
        self.steps.lock().clone()
    }

    pub fn runs(&self) -> RunTotals {
        self.runs.lock().clone()
    }

    pub fn total_written(&self) -> usize {
        self.steps.lock().values().map(|s| s.written).sum()
    }

    pub fn log_summary(&self) {
        for (kind, stats) in self.steps.lock().iter() {
            info!(
                kind = %kind,
                written = stats.written,
                elapsed_ms = stats.elapsed.as_millis() as u64,
                "Step summary"
            );
        }
        let runs = self.runs.lock();
        info!(
            started = runs.started,
            succeeded = runs.succeeded,
            failed = runs.failed,
            rejected = runs.rejected,
            "Run summary"
        );
    }
}

impl RunMetrics for MetricsCollector {
    fn record_step(&self, kind: &str, written: usize, elapsed: Duration) {
        let mut steps = self.steps.lock();
        let stats = steps.entry(kind.to_string()).or_default();
        stats.steps += 1;
        stats.written += written;
        stats.elapsed += elapsed;
    }

    fn run_started(&self, _run_id: Uuid) {
        self.runs.lock().started += 1;
    }

    fn run_finished(&self, _run_id: Uuid, outcome: Result<usize, &SyncError>, _elapsed: Duration) {
        let mut runs = self.runs.lock();
        match outcome {
            Ok(_) => runs.succeeded += 1,
            Err(_) => runs.failed += 1,
        }
    }

    fn run_rejected(&self) {
        self.runs.lock().rejected += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_accumulate_per_kind() {
        let collector = MetricsCollector::new();
        collector.record_step("Report", 3, Duration::from_millis(10));
        collector.record_step("Report", 2, Duration::from_millis(5));
        collector.record_step("Universe", 1, Duration::from_millis(1));

        let steps = collector.steps();
        assert_eq!(steps["Report"].steps, 2);
        assert_eq!(steps["Report"].written, 5);
        assert_eq!(steps["Report"].elapsed, Duration::from_millis(15));
        assert_eq!(collector.total_written(), 6);
    }

    #[test]
    fn test_run_outcomes() {
        let collector = MetricsCollector::new();
        let run = Uuid::new_v4();
        collector.run_started(run);
        collector.run_finished(run, Ok(4), Duration::ZERO);
        collector.run_started(run);
        collector.run_finished(run, Err(&SyncError::validation("x")), Duration::ZERO);
        collector.run_rejected();

        assert_eq!(
            collector.runs(),
            RunTotals {
                started: 2,
                succeeded: 1,
                failed: 1,
                rejected: 1
            }
        );
    }
}
