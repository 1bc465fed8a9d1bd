use anyhow::{Context, Result};
use bo_sync::{SyncOrchestrator, SyncScheduler};
use bo_sync_core::config::BoSyncConfig;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::http::{self, AppState};
use crate::scheduler::{JobScheduler, Timer};
use crate::telemetry::DaemonMetrics;

pub struct SyncDaemon {
    config: BoSyncConfig,
    orchestrator: SyncOrchestrator,
    scheduler: SyncScheduler,
    job_scheduler: Option<JobScheduler>,
    metrics: DaemonMetrics,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl SyncDaemon {
    pub fn new(config: BoSyncConfig) -> Result<Self> {
        info!("Initializing sync daemon");
        config.validate()?;

        let metrics = DaemonMetrics::new()?;
        let orchestrator = SyncOrchestrator::from_config(&config)
            .context("Failed to set up environments")?
            .with_metrics(Arc::new(metrics.clone()));

        let schedule = &config.sync.schedule;
        let scheduler = SyncScheduler::new(
            Arc::new(orchestrator.clone()),
            config.sync.enabled,
            schedule.schedule_type.to_string(),
        )
        .with_scheduled_force_update(config.sync.force_update)
        .with_metrics(Arc::new(metrics.clone()));

        let job_scheduler = if schedule.enabled {
            let timer = Timer::from_config(&schedule.schedule_type)?;
            Some(JobScheduler::new(scheduler.clone(), timer))
        } else {
            info!("Timer-driven synchronization is off");
            None
        };

        info!(
            source = %config.source.url,
            target = %config.target.url,
            backend = ?config.client.backend,
            schedule = %schedule.schedule_type,
            "Sync daemon initialized"
        );

        Ok(Self {
            config,
            orchestrator,
            scheduler,
            job_scheduler,
            metrics,
            tasks: Vec::new(),
        })
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) -> Result<()> {
        info!("Starting sync daemon");

        if let Some(job_scheduler) = self.job_scheduler.as_mut() {
            job_scheduler.start().await?;
        }

        if self.config.http.enabled {
            self.start_http_server().await?;
        }

        info!("Sync daemon started successfully");

        tokio::signal::ctrl_c().await?;
        info!("Ctrl+C received, shutting down");

        self.shutdown().await?;
        info!("Sync daemon stopped");
        Ok(())
    }

    async fn start_http_server(&mut self) -> Result<()> {
        let bind_addr = format!(
            "{}:{}",
            self.config.http.bind_address, self.config.http.port
        );

        let app = http::router(AppState {
            orchestrator: self.orchestrator.clone(),
            scheduler: self.scheduler.clone(),
            metrics: self.metrics.clone(),
        });

        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", bind_addr))?;
        info!("HTTP server listening on {}", bind_addr);

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("HTTP server stopped: {}", e);
            }
        });

        self.tasks.push(("http_server", handle));
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down sync daemon");

        if let Some(job_scheduler) = self.job_scheduler.as_mut() {
            job_scheduler.stop().await?;
        }

        for (name, handle) in self.tasks.drain(..) {
            debug!("Stopping task: {}", name);
            handle.abort();
        }

        if self.scheduler.is_in_progress() {
            info!("A synchronization run is still in flight and will be abandoned");
        }
        Ok(())
    }
}

impl Drop for SyncDaemon {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bo_sync_core::config::{Backend, ScheduleType};
    use std::time::Duration;

    fn memory_config() -> BoSyncConfig {
        let mut config = BoSyncConfig::default();
        config.client.backend = Backend::Memory;
        config
    }

    #[tokio::test]
    async fn test_schedule_off_by_default() {
        let daemon = SyncDaemon::new(memory_config()).unwrap();
        assert!(daemon.job_scheduler.is_none());
        assert_eq!(daemon.scheduler.status().schedule, "0 0 1 * * *");
        assert!(daemon.scheduler.status().enabled);
    }

    #[tokio::test]
    async fn test_interval_schedule_is_wired() {
        let mut config = memory_config();
        config.sync.schedule.enabled = true;
        config.sync.schedule.schedule_type = ScheduleType::Interval {
            interval: Duration::from_secs(3600),
        };

        let daemon = SyncDaemon::new(config).unwrap();
        assert!(daemon.job_scheduler.is_some());
        assert_eq!(daemon.scheduler.status().schedule, "every 1h");
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = memory_config();
        config.sync.batch_size = 0;
        assert!(SyncDaemon::new(config).is_err());
    }

    #[tokio::test]
    async fn test_manual_run_against_memory_backend() {
        let daemon = SyncDaemon::new(memory_config()).unwrap();
        let handle = daemon.scheduler.trigger_sync(false).unwrap();
        assert_eq!(bo_sync::join_run(handle).await.unwrap(), 0);
        assert_eq!(daemon.metrics.runs_started_total.get(), 1);
    }
}
