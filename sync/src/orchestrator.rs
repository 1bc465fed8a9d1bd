//! Ordered runs across every artifact type.

use bo_sync_core::api::{ArtifactKind, ArtifactRef, Connection, ListOptions, Report, Universe};
use bo_sync_core::config::{BoSyncConfig, ObjectToggles};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

use crate::comparator::{ComparisonDocument, ConfigComparator};
use crate::dependencies::DependencyPropagator;
use crate::environment::EnvironmentResolver;
use crate::error::{Result, SyncError};
use crate::metrics::RunMetrics;
use crate::options::{Selector, SyncOptions};
use crate::reconcile::{FolderReconciler, Reconcilable, Reconciler};
use crate::retry::RetryPolicy;

/// Engine-level settings taken from the `[sync]` section.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    pub batch_size: i64,
    pub objects: ObjectToggles,
    pub retry: RetryPolicy,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            batch_size: crate::options::DEFAULT_BATCH_SIZE,
            objects: ObjectToggles::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&BoSyncConfig> for OrchestratorSettings {
    fn from(config: &BoSyncConfig) -> Self {
        Self {
            batch_size: config.sync.batch_size,
            objects: config.sync.objects,
            retry: RetryPolicy::from(&config.sync.retry),
        }
    }
}

/// Entry point for every synchronization operation.
///
/// Handles are resolved per call, so each run works on fresh source state.
#[derive(Clone)]
pub struct SyncOrchestrator {
    resolver: EnvironmentResolver,
    settings: OrchestratorSettings,
    comparator: ConfigComparator,
    metrics: Option<Arc<dyn RunMetrics>>,
}

impl SyncOrchestrator {
    pub fn new(resolver: EnvironmentResolver, settings: OrchestratorSettings) -> Self {
        Self {
            comparator: ConfigComparator::new(resolver.clone()),
            resolver,
            settings,
            metrics: None,
        }
    }

    pub fn from_config(config: &BoSyncConfig) -> Result<Self> {
        let resolver = EnvironmentResolver::from_config(config)?;
        Ok(Self::new(resolver, OrchestratorSettings::from(config)))
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn RunMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn resolver(&self) -> &EnvironmentResolver {
        &self.resolver
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    fn reconciler(&self) -> Result<Reconciler> {
        Ok(Reconciler::new(
            self.resolver.source()?,
            self.resolver.target()?,
            self.settings.retry,
        ))
    }

    fn folder_reconciler(&self) -> Result<FolderReconciler> {
        Ok(FolderReconciler::new(
            self.resolver.source()?,
            self.resolver.target()?,
            self.settings.retry,
        ))
    }

    fn base_options(&self, force_update: bool) -> SyncOptions {
        SyncOptions::default()
            .force_update(force_update)
            .batch_size(self.settings.batch_size)
    }

    async fn step<A: Reconcilable>(
        &self,
        reconciler: &Reconciler,
        enabled: bool,
        selector: &Selector,
        options: &SyncOptions,
    ) -> Result<usize> {
        if !enabled {
            info!(kind = %A::KIND, "Object type disabled, skipping");
            return Ok(0);
        }
        let started = Instant::now();
        let count = reconciler.reconcile::<A>(selector, options).await?;
        self.record(A::KIND.as_str(), count, started);
        Ok(count)
    }

    async fn folder_step(
        &self,
        folders: &FolderReconciler,
        paths: &[Option<String>],
        options: &SyncOptions,
    ) -> Result<usize> {
        if !self.settings.objects.folders {
            info!("Folders disabled, skipping");
            return Ok(0);
        }
        let started = Instant::now();
        let mut count = 0;
        for path in paths {
            count += folders.reconcile(path.as_deref(), options).await?;
        }
        self.record(ArtifactKind::Folder.as_str(), count, started);
        Ok(count)
    }

    fn record(&self, kind: &str, count: usize, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record_step(kind, count, started.elapsed());
        }
    }

    /// Folders, connections, universes, then reports. The first failing
    /// step aborts the run.
    #[instrument(skip(self))]
    pub async fn sync_all(&self, force_update: bool) -> Result<usize> {
        info!("Starting full synchronization");
        let reconciler = self.reconciler()?;
        let folders = self.folder_reconciler()?;
        let options = self.base_options(force_update);
        let objects = self.settings.objects;

        let mut total = self.folder_step(&folders, &[None], &options).await?;
        total += self
            .step::<Connection>(&reconciler, objects.connections, &Selector::All, &options)
            .await?;
        total += self
            .step::<Universe>(&reconciler, objects.universes, &Selector::All, &options)
            .await?;
        total += self
            .step::<Report>(&reconciler, objects.reports, &Selector::All, &options)
            .await?;

        info!(total, "Full synchronization completed");
        Ok(total)
    }

    /// Same order as [`sync_all`](Self::sync_all), restricted to objects
    /// modified after `modified_after` and, when given, to `folder_ids`.
    #[instrument(skip(self))]
    pub async fn sync_incremental(
        &self,
        modified_after: Option<DateTime<Utc>>,
        folder_ids: Option<Vec<String>>,
        force_update: bool,
    ) -> Result<usize> {
        info!("Starting incremental synchronization");
        let reconciler = self.reconciler()?;
        let folders = self.folder_reconciler()?;
        let options = self
            .base_options(force_update)
            .modified_after(modified_after);
        let objects = self.settings.objects;

        let selector = Selector::folders(folder_ids);
        let paths: Vec<Option<String>> = match &selector {
            Selector::Folders(ids) => ids.iter().cloned().map(Some).collect(),
            _ => vec![None],
        };

        let mut total = self.folder_step(&folders, &paths, &options).await?;
        total += self
            .step::<Connection>(&reconciler, objects.connections, &selector, &options)
            .await?;
        total += self
            .step::<Universe>(&reconciler, objects.universes, &selector, &options)
            .await?;
        total += self
            .step::<Report>(&reconciler, objects.reports, &selector, &options)
            .await?;

        info!(total, "Incremental synchronization completed");
        Ok(total)
    }

    /// `ids` holding no `/` are report IDs; otherwise they name folders.
    pub async fn sync_reports(&self, ids: Option<Vec<String>>, options: SyncOptions) -> Result<usize> {
        self.reconciler()?
            .reconcile::<Report>(&Selector::classify(ids), &options)
            .await
    }

    pub async fn sync_universes(
        &self,
        ids: Option<Vec<String>>,
        options: SyncOptions,
    ) -> Result<usize> {
        self.reconciler()?
            .reconcile::<Universe>(&Selector::classify(ids), &options)
            .await
    }

    pub async fn sync_connections(
        &self,
        ids: Option<Vec<String>>,
        options: SyncOptions,
    ) -> Result<usize> {
        self.reconciler()?
            .reconcile::<Connection>(&Selector::classify(ids), &options)
            .await
    }

    pub async fn sync_folders(&self, path: Option<&str>, options: SyncOptions) -> Result<usize> {
        self.folder_reconciler()?.reconcile(path, &options).await
    }

    pub async fn sync_universe_dependencies(
        &self,
        universe_id: &str,
        types: Option<&[ArtifactKind]>,
    ) -> Result<usize> {
        if universe_id.trim().is_empty() {
            return Err(SyncError::validation("Universe ID cannot be empty"));
        }
        DependencyPropagator::new(self.reconciler()?)
            .propagate(universe_id, types)
            .await
    }

    /// Searches the source environment.
    pub async fn search(
        &self,
        query: &str,
        types: Option<&[ArtifactKind]>,
        modified_after: Option<DateTime<Utc>>,
        options: &ListOptions,
    ) -> Result<Vec<ArtifactRef>> {
        if query.trim().is_empty() {
            return Err(SyncError::validation("Search query cannot be empty"));
        }
        let source = self.resolver.source()?;
        Ok(source.search(query, types, modified_after, options).await?)
    }

    pub async fn compare_server_configs(
        &self,
        config_type: &str,
        options: &ListOptions,
    ) -> Result<ComparisonDocument> {
        self.comparator.compare_server_configs(config_type, options).await
    }

    pub async fn compare_cluster_configs(
        &self,
        cluster_id: Option<&str>,
        options: &ListOptions,
    ) -> Result<ComparisonDocument> {
        self.comparator.compare_cluster_configs(cluster_id, options).await
    }

    pub async fn compare_configs(
        &self,
        env_a: &str,
        env_b: &str,
        config_type: &str,
        options: &ListOptions,
    ) -> Result<ComparisonDocument> {
        self.comparator
            .compare_configs(env_a, env_b, config_type, options)
            .await
    }
}
