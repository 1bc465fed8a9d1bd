//! Single-flight guard around orchestrator runs.
//!
//! At most one run is in flight per [`SyncScheduler`]. Manual triggers
//! that arrive while a run is active get [`SyncError::AlreadyInProgress`];
//! timer ticks are skipped. Status is kept in atomics so it can be read
//! at any time without waiting on a run.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::metrics::RunMetrics;
use crate::orchestrator::SyncOrchestrator;

/// What the scheduler drives.
#[async_trait]
pub trait SyncRunner: Send + Sync + 'static {
    async fn sync_all(&self, force_update: bool) -> Result<usize>;

    async fn sync_incremental(
        &self,
        modified_after: Option<DateTime<Utc>>,
        folder_ids: Option<Vec<String>>,
        force_update: bool,
    ) -> Result<usize>;
}

#[async_trait]
impl SyncRunner for SyncOrchestrator {
    async fn sync_all(&self, force_update: bool) -> Result<usize> {
        SyncOrchestrator::sync_all(self, force_update).await
    }

    async fn sync_incremental(
        &self,
        modified_after: Option<DateTime<Utc>>,
        folder_ids: Option<Vec<String>>,
        force_update: bool,
    ) -> Result<usize> {
        SyncOrchestrator::sync_incremental(self, modified_after, folder_ids, force_update).await
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub enabled: bool,
    pub in_progress: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_sync_count: u64,
    pub schedule: String,
}

#[derive(Debug, Clone, PartialEq)]
enum RunRequest {
    Full {
        force_update: bool,
    },
    Incremental {
        modified_after: Option<DateTime<Utc>>,
        folder_ids: Option<Vec<String>>,
        force_update: bool,
    },
}

const NEVER: i64 = i64::MIN;

#[derive(Debug)]
struct RunState {
    in_progress: AtomicBool,
    last_sync_millis: AtomicI64,
    last_sync_count: AtomicU64,
}

/// Clears the in-progress flag when the run ends, including by panic.
struct FlightGuard {
    state: Arc<RunState>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.state.in_progress.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct SyncScheduler {
    runner: Arc<dyn SyncRunner>,
    state: Arc<RunState>,
    enabled: bool,
    force_update: bool,
    schedule: String,
    metrics: Option<Arc<dyn RunMetrics>>,
}

impl SyncScheduler {
    /// `enabled` gates timer ticks only; manual triggers always run.
    pub fn new(runner: Arc<dyn SyncRunner>, enabled: bool, schedule: impl Into<String>) -> Self {
        Self {
            runner,
            state: Arc::new(RunState {
                in_progress: AtomicBool::new(false),
                last_sync_millis: AtomicI64::new(NEVER),
                last_sync_count: AtomicU64::new(0),
            }),
            enabled,
            force_update: false,
            schedule: schedule.into(),
            metrics: None,
        }
    }

    /// `forceUpdate` used by timer-driven runs.
    pub fn with_scheduled_force_update(mut self, force_update: bool) -> Self {
        self.force_update = force_update;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn RunMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn status(&self) -> SyncStatus {
        // Time is published after count, so read it first.
        let millis = self.state.last_sync_millis.load(Ordering::Acquire);
        let count = self.state.last_sync_count.load(Ordering::Acquire);
        SyncStatus {
            enabled: self.enabled,
            in_progress: self.state.in_progress.load(Ordering::Acquire),
            last_sync_time: (millis != NEVER)
                .then(|| Utc.timestamp_millis_opt(millis).single())
                .flatten(),
            last_sync_count: count,
            schedule: self.schedule.clone(),
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.state.in_progress.load(Ordering::Acquire)
    }

    /// Starts a full run in the background.
    pub fn trigger_sync(&self, force_update: bool) -> Result<JoinHandle<Result<usize>>> {
        self.trigger(RunRequest::Full { force_update })
    }

    /// Starts an incremental run in the background.
    pub fn trigger_incremental(
        &self,
        modified_after: Option<DateTime<Utc>>,
        folder_ids: Option<Vec<String>>,
        force_update: bool,
    ) -> Result<JoinHandle<Result<usize>>> {
        self.trigger(RunRequest::Incremental {
            modified_after,
            folder_ids,
            force_update,
        })
    }

    /// Timer entry point. Returns `None` when scheduling is disabled or a
    /// run is already in flight.
    pub fn tick(&self) -> Option<JoinHandle<Result<usize>>> {
        if !self.enabled {
            info!("Scheduled synchronization is disabled");
            return None;
        }
        match self.trigger(RunRequest::Full {
            force_update: self.force_update,
        }) {
            Ok(handle) => Some(handle),
            Err(_) => {
                info!("Synchronization already in progress, skipping scheduled run");
                None
            }
        }
    }

    fn trigger(&self, request: RunRequest) -> Result<JoinHandle<Result<usize>>> {
        let guard = self.try_begin().ok_or_else(|| {
            if let Some(metrics) = &self.metrics {
                metrics.run_rejected();
            }
            SyncError::AlreadyInProgress
        })?;
        Ok(self.spawn(guard, request))
    }

    fn try_begin(&self) -> Option<FlightGuard> {
        self.state
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                state: self.state.clone(),
            })
    }

    fn spawn(&self, guard: FlightGuard, request: RunRequest) -> JoinHandle<Result<usize>> {
        let runner = self.runner.clone();
        let state = self.state.clone();
        let metrics = self.metrics.clone();
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", run_id = %run_id);

        tokio::spawn(
            async move {
                let _guard = guard;
                let started = Instant::now();
                if let Some(metrics) = &metrics {
                    metrics.run_started(run_id);
                }
                info!(?request, "Synchronization started");

                let outcome = match request {
                    RunRequest::Full { force_update } => runner.sync_all(force_update).await,
                    RunRequest::Incremental {
                        modified_after,
                        folder_ids,
                        force_update,
                    } => {
                        runner
                            .sync_incremental(modified_after, folder_ids, force_update)
                            .await
                    }
                };

                match &outcome {
                    Ok(count) => {
                        state
                            .last_sync_count
                            .store(*count as u64, Ordering::Release);
                        state
                            .last_sync_millis
                            .store(Utc::now().timestamp_millis(), Ordering::Release);
                        info!(count, "Synchronization completed");
                    }
                    Err(e) => error!("Synchronization failed: {}", e),
                }
                if let Some(metrics) = &metrics {
                    metrics.run_finished(run_id, outcome.as_ref().copied(), started.elapsed());
                }
                outcome
            }
            .instrument(span),
        )
    }
}

/// Waits for a triggered run, turning a panicked task into an error.
pub async fn join_run(handle: JoinHandle<Result<usize>>) -> Result<usize> {
    handle
        .await
        .map_err(|e| SyncError::Task(e.to_string()))?
}
