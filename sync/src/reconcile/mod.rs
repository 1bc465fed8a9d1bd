//! Per-type reconciliation of source objects into the target.
//!
//! Every type follows the same shape: resolve candidates from the source,
//! look each one up in the target, and write it when it is missing or the
//! caller forces an update. Folders differ enough to live in [`folders`].

pub mod folders;

use async_trait::async_trait;
use bo_sync_core::api::{
    self, ArtifactKind, ArtifactRef, Connection, DirectoryHandle, DirectoryService, Report,
    Universe,
};
use tracing::{debug, info, instrument, warn};

use crate::batch::run_batched;
use crate::error::Result;
use crate::options::{Selector, SyncOptions};
use crate::retry::{with_retry, RetryPolicy};

pub use folders::FolderReconciler;

/// An artifact type the engine can copy between environments.
#[async_trait]
pub trait Reconcilable: Clone + Send + Sync + Sized + 'static {
    const KIND: ArtifactKind;

    /// Whether source listings can be scoped to a folder.
    const FOLDER_SCOPED: bool = true;

    /// Whether writes go through the batch executor.
    const BATCHED: bool = false;

    fn base(&self) -> &ArtifactRef;

    async fn list(
        source: &dyn DirectoryService,
        folder_id: Option<&str>,
        options: &SyncOptions,
    ) -> api::Result<Vec<Self>>;

    async fn fetch(directory: &dyn DirectoryService, id: &str) -> api::Result<Self>;

    async fn save(directory: &dyn DirectoryService, item: &Self) -> api::Result<Self>;
}

#[async_trait]
impl Reconcilable for Connection {
    const KIND: ArtifactKind = ArtifactKind::Connection;
    const FOLDER_SCOPED: bool = false;

    fn base(&self) -> &ArtifactRef {
        &self.base
    }

    async fn list(
        source: &dyn DirectoryService,
        _folder_id: Option<&str>,
        options: &SyncOptions,
    ) -> api::Result<Vec<Self>> {
        source
            .list_connections(options.modified_after, &options.params)
            .await
    }

    async fn fetch(directory: &dyn DirectoryService, id: &str) -> api::Result<Self> {
        directory.get_connection(id).await
    }

    async fn save(directory: &dyn DirectoryService, item: &Self) -> api::Result<Self> {
        directory.save_connection(item).await
    }
}

#[async_trait]
impl Reconcilable for Universe {
    const KIND: ArtifactKind = ArtifactKind::Universe;

    fn base(&self) -> &ArtifactRef {
        &self.base
    }

    async fn list(
        source: &dyn DirectoryService,
        folder_id: Option<&str>,
        options: &SyncOptions,
    ) -> api::Result<Vec<Self>> {
        source
            .list_universes(folder_id, options.modified_after, &options.params)
            .await
    }

    async fn fetch(directory: &dyn DirectoryService, id: &str) -> api::Result<Self> {
        directory.get_universe(id).await
    }

    async fn save(directory: &dyn DirectoryService, item: &Self) -> api::Result<Self> {
        directory.save_universe(item).await
    }
}

#[async_trait]
impl Reconcilable for Report {
    const KIND: ArtifactKind = ArtifactKind::Report;
    const BATCHED: bool = true;

    fn base(&self) -> &ArtifactRef {
        &self.base
    }

    async fn list(
        source: &dyn DirectoryService,
        folder_id: Option<&str>,
        options: &SyncOptions,
    ) -> api::Result<Vec<Self>> {
        source
            .list_reports(folder_id, options.modified_after, &options.params)
            .await
    }

    async fn fetch(directory: &dyn DirectoryService, id: &str) -> api::Result<Self> {
        directory.get_report(id).await
    }

    async fn save(directory: &dyn DirectoryService, item: &Self) -> api::Result<Self> {
        directory.save_report(item).await
    }
}

/// Copies one artifact type from a source handle to a target handle.
#[derive(Clone)]
pub struct Reconciler {
    source: DirectoryHandle,
    target: DirectoryHandle,
    retry: RetryPolicy,
}

impl Reconciler {
    pub fn new(source: DirectoryHandle, target: DirectoryHandle, retry: RetryPolicy) -> Self {
        Self {
            source,
            target,
            retry,
        }
    }

    pub fn source(&self) -> &DirectoryHandle {
        &self.source
    }

    pub fn target(&self) -> &DirectoryHandle {
        &self.target
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Reconciles `A` objects picked by `selector`; returns how many were
    /// written. The whole call is retried on transient failures.
    #[instrument(skip(self, options), fields(kind = %A::KIND, force = options.force_update))]
    pub async fn reconcile<A: Reconcilable>(
        &self,
        selector: &Selector,
        options: &SyncOptions,
    ) -> Result<usize> {
        let count = with_retry(self.retry, A::KIND.as_str(), || {
            self.reconcile_once::<A>(selector, options)
        })
        .await?;

        info!(kind = %A::KIND, count, "Synchronized objects");
        Ok(count)
    }

    async fn reconcile_once<A: Reconcilable>(
        &self,
        selector: &Selector,
        options: &SyncOptions,
    ) -> Result<usize> {
        // Every candidate is resolved before the first write.
        let candidates = self.candidates::<A>(selector, options).await?;
        info!(kind = %A::KIND, candidates = candidates.len(), "Found objects in source environment");

        let force = options.force_update;
        if A::BATCHED {
            let target = self.target.clone();
            let written = run_batched(candidates, options.batch_size, move |item: A| {
                let target = target.clone();
                async move { upsert(target.as_ref(), &item, force).await }
            })
            .await;
            return Ok(written);
        }

        let mut written = 0;
        for item in &candidates {
            if upsert(self.target.as_ref(), item, force).await {
                written += 1;
            }
        }
        Ok(written)
    }

    async fn candidates<A: Reconcilable>(
        &self,
        selector: &Selector,
        options: &SyncOptions,
    ) -> Result<Vec<A>> {
        let source = self.source.as_ref();
        match selector {
            Selector::Ids(ids) => {
                let mut found = Vec::with_capacity(ids.len());
                for id in ids {
                    match A::fetch(source, id).await {
                        Ok(item) => found.push(item),
                        Err(e) if e.is_not_found() => {
                            warn!(kind = %A::KIND, id = %id, "Requested object not found in source, skipping");
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Ok(found)
            }
            Selector::Folders(folder_ids) if A::FOLDER_SCOPED => {
                let mut found = Vec::new();
                for folder_id in folder_ids {
                    found.extend(A::list(source, Some(folder_id), options).await?);
                }
                Ok(found)
            }
            Selector::Folders(_) | Selector::All => Ok(A::list(source, None, options).await?),
        }
    }
}

/// Writes `item` when the target lacks it or `force` is set. Failures are
/// logged and reported as `false`.
async fn upsert<A: Reconcilable>(target: &dyn DirectoryService, item: &A, force: bool) -> bool {
    let base = item.base();
    let exists = match A::fetch(target, &base.id).await {
        Ok(_) => true,
        Err(e) => {
            debug!(kind = %A::KIND, id = %base.id, "Treating object as absent: {}", e);
            false
        }
    };

    if exists && !force {
        debug!(kind = %A::KIND, name = %base.name, "Object already exists and forceUpdate is false");
        return false;
    }

    match A::save(target, item).await {
        Ok(_) => {
            debug!(
                kind = %A::KIND,
                name = %base.name,
                "{} object",
                if exists { "Updated" } else { "Created" }
            );
            true
        }
        Err(e) => {
            warn!(kind = %A::KIND, id = %base.id, name = %base.name, "Error processing object: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bo_sync_core::api::{FailureMode, MemoryDirectory, Operation};
    use std::sync::Arc;
    use std::time::Duration;

    fn setup() -> (Arc<MemoryDirectory>, Arc<MemoryDirectory>, Reconciler) {
        let source = Arc::new(MemoryDirectory::new("source"));
        let target = Arc::new(MemoryDirectory::with_journal(
            "target",
            source.journal().clone(),
        ));
        let reconciler = Reconciler::new(
            source.clone(),
            target.clone(),
            RetryPolicy {
                max_attempts: 3,
                delay: Duration::from_millis(1),
            },
        );
        (source, target, reconciler)
    }

    #[tokio::test]
    async fn test_existing_reports_are_skipped() {
        let (source, target, reconciler) = setup();
        source.insert_report(Report::new("r1", "Revenue"));
        source.insert_report(Report::new("r2", "Margin"));
        target.insert_report(Report::new("r1", "Revenue"));

        let count = reconciler
            .reconcile::<Report>(&Selector::All, &SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(count, 1);
        let writes = source.journal().writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].id.as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn test_id_selector_reads_points_and_skips_missing() {
        let (source, target, reconciler) = setup();
        source.insert_universe(Universe::new("u1", "Sales"));
        source.insert_universe(Universe::new("u2", "Finance"));

        let selector = Selector::Ids(vec!["u2".to_string(), "u404".to_string()]);
        let count = reconciler
            .reconcile::<Universe>(&selector, &SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(count, 1);
        assert_eq!(target.universes().len(), 1);
        assert_eq!(source.journal().count("source", Operation::ListUniverses), 0);
    }

    #[tokio::test]
    async fn test_folder_selector_scopes_listing() {
        let (source, target, reconciler) = setup();
        let mut in_sales = Universe::new("u1", "Sales");
        in_sales.base.parent_id = Some("/Sales".to_string());
        source.insert_universe(in_sales);
        source.insert_universe(Universe::new("u2", "Elsewhere"));

        let selector = Selector::Folders(vec!["/Sales".to_string()]);
        let count = reconciler
            .reconcile::<Universe>(&selector, &SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(count, 1);
        assert_eq!(target.universes()[0].base.id, "u1");
    }

    #[tokio::test]
    async fn test_connections_ignore_folder_scope() {
        let (source, target, reconciler) = setup();
        source.insert_connection(Connection::new("c1", "Warehouse"));

        let selector = Selector::Folders(vec!["/Sales".to_string(), "/HR".to_string()]);
        let count = reconciler
            .reconcile::<Connection>(&selector, &SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(count, 1);
        assert_eq!(target.connections().len(), 1);
        assert_eq!(source.journal().count("source", Operation::ListConnections), 1);
    }

    #[tokio::test]
    async fn test_lookup_failure_means_absent() {
        let (source, target, reconciler) = setup();
        source.insert_connection(Connection::new("c1", "Warehouse"));
        target.insert_connection(Connection::new("c1", "Warehouse"));
        target.fail(Operation::GetConnection, FailureMode::Permanent, None);

        let count = reconciler
            .reconcile::<Connection>(&Selector::All, &SyncOptions::default())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_failed_write_is_not_counted() {
        let (source, target, reconciler) = setup();
        for id in ["r1", "r2", "r3"] {
            source.insert_report(Report::new(id, id));
        }
        target.fail_on(Operation::SaveReport, "r2", FailureMode::Permanent, None);

        let count = reconciler
            .reconcile::<Report>(&Selector::All, &SyncOptions::default().batch_size(2))
            .await
            .unwrap();

        assert_eq!(count, 2);
        assert_eq!(target.reports().len(), 2);
    }

    #[tokio::test]
    async fn test_modified_after_filters_candidates() {
        let (source, target, reconciler) = setup();
        let cutoff = chrono::Utc::now();
        let mut old = Report::new("r-old", "Old");
        old.base.modified = Some(cutoff - chrono::Duration::days(2));
        let mut new = Report::new("r-new", "New");
        new.base.modified = Some(cutoff + chrono::Duration::hours(1));
        source.insert_report(old);
        source.insert_report(new);

        let options = SyncOptions::default().modified_after(Some(cutoff));
        let count = reconciler
            .reconcile::<Report>(&Selector::All, &options)
            .await
            .unwrap();

        assert_eq!(count, 1);
        assert_eq!(target.reports()[0].base.id, "r-new");
    }
}
