use anyhow::Result;
use bo_sync::SyncScheduler;
use bo_sync_core::config::ScheduleType;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Parsed form of the configured schedule.
#[derive(Debug, Clone)]
pub enum Timer {
    Interval { interval: Duration },
    Cron { schedule: Box<Schedule> },
}

impl Timer {
    pub fn from_config(schedule_type: &ScheduleType) -> Result<Self> {
        match schedule_type {
            ScheduleType::Interval { interval } => {
                if interval.is_zero() {
                    anyhow::bail!("Schedule interval must be non-zero");
                }
                Ok(Timer::Interval {
                    interval: *interval,
                })
            }
            ScheduleType::Cron { expression } => {
                let schedule = Schedule::from_str(expression).map_err(|e| {
                    anyhow::anyhow!("Invalid cron expression '{}': {}", expression, e)
                })?;
                Ok(Timer::Cron {
                    schedule: Box::new(schedule),
                })
            }
        }
    }

    /// First firing strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Timer::Interval { interval } => {
                chrono::Duration::from_std(*interval).ok().map(|step| now + step)
            }
            Timer::Cron { schedule } => schedule.after(&now).next(),
        }
    }
}

/// Next planned firing, shared with status readers.
pub type NextRun = Option<DateTime<Utc>>;

/// Drives [`SyncScheduler::tick`] from the configured timer.
pub struct JobScheduler {
    scheduler: SyncScheduler,
    timer: Timer,
    running: Arc<RwLock<bool>>,
    next_run: Arc<RwLock<NextRun>>,
    task: Option<JoinHandle<()>>,
}

impl JobScheduler {
    pub fn new(scheduler: SyncScheduler, timer: Timer) -> Self {
        Self {
            scheduler,
            timer,
            running: Arc::new(RwLock::new(false)),
            next_run: Arc::new(RwLock::new(None)),
            task: None,
        }
    }

    pub async fn start(&mut self) -> Result<()> {
        let mut running = self.running.write().await;
        if *running {
            warn!("Job scheduler is already running");
            return Ok(());
        }
        *running = true;
        drop(running);

        let scheduler = self.scheduler.clone();
        let running = self.running.clone();
        let next_run = self.next_run.clone();

        let handle = match self.timer.clone() {
            Timer::Interval { interval } => {
                info!("Starting interval schedule every {:?}", interval);
                tokio::spawn(async move {
                    Self::run_interval_job(scheduler, interval, running, next_run).await;
                })
            }
            Timer::Cron { schedule } => {
                info!("Starting cron schedule");
                tokio::spawn(async move {
                    Self::run_cron_job(scheduler, *schedule, running, next_run).await;
                })
            }
        };

        self.task = Some(handle);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        let mut running = self.running.write().await;
        if !*running {
            return Ok(());
        }
        *running = false;
        info!("Stopping job scheduler");

        if let Some(handle) = self.task.take() {
            handle.abort();
        }
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    pub async fn next_run(&self) -> NextRun {
        *self.next_run.read().await
    }

    async fn run_interval_job(
        scheduler: SyncScheduler,
        interval: Duration,
        running: Arc<RwLock<bool>>,
        next_run: Arc<RwLock<NextRun>>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // Skip the first immediate tick

        while *running.read().await {
            *next_run.write().await = Timer::Interval { interval }.next_after(Utc::now());
            ticker.tick().await;

            debug!("Interval elapsed, triggering scheduled synchronization");
            Self::fire(&scheduler);
        }

        debug!("Interval schedule stopped");
    }

    async fn run_cron_job(
        scheduler: SyncScheduler,
        schedule: Schedule,
        running: Arc<RwLock<bool>>,
        next_run: Arc<RwLock<NextRun>>,
    ) {
        while *running.read().await {
            let now = Utc::now();
            let next = match schedule.after(&now).next() {
                Some(datetime) => datetime,
                None => {
                    error!("Failed to calculate next run time for cron schedule");
                    break;
                }
            };
            *next_run.write().await = Some(next);

            let duration_until_next = (next - now).to_std().unwrap_or(Duration::from_secs(60));
            debug!(
                "Next scheduled synchronization at {} (in {:?})",
                next, duration_until_next
            );

            sleep(duration_until_next).await;

            if !*running.read().await {
                break;
            }
            Self::fire(&scheduler);
        }

        debug!("Cron schedule stopped");
    }

    /// The run itself is detached; a tick never waits for it.
    fn fire(scheduler: &SyncScheduler) {
        if let Some(handle) = scheduler.tick() {
            tokio::spawn(async move {
                if let Err(e) = bo_sync::join_run(handle).await {
                    error!("Scheduled synchronization failed: {}", e);
                }
            });
        }
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.task.take() {
            handle.abort();
        }
    }
}
