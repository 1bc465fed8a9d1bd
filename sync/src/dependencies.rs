use bo_sync_core::api::{ArtifactKind, Connection, Report, Universe};
use tracing::{error, info, instrument, warn};

use crate::error::Result;
use crate::options::{Selector, SyncOptions};
use crate::reconcile::Reconciler;
use crate::retry::with_retry;

/// Force-syncs the objects a universe depends on.
#[derive(Clone)]
pub struct DependencyPropagator {
    reconciler: Reconciler,
}

impl DependencyPropagator {
    pub fn new(reconciler: Reconciler) -> Self {
        Self { reconciler }
    }

    /// Returns how many dependencies of `universe_id` were written to the
    /// target. A universe missing from the source yields 0; other lookup
    /// failures are retried and then returned. Failures of a single
    /// dependency are logged and do not stop the others.
    #[instrument(skip(self))]
    pub async fn propagate(
        &self,
        universe_id: &str,
        types: Option<&[ArtifactKind]>,
    ) -> Result<usize> {
        let source = self.reconciler.source();
        let policy = self.reconciler.retry_policy();

        let universe = match with_retry(policy, "get_universe", || async move {
            Ok(source.get_universe(universe_id).await?)
        })
        .await
        {
            Ok(universe) => universe,
            Err(e) if e.is_not_found() => {
                error!(universe_id, "Universe not found in source environment: {}", e);
                return Ok(0);
            }
            Err(e) => return Err(e),
        };

        let dependencies = with_retry(policy, "get_dependencies", || async move {
            Ok(source.get_dependencies(universe_id, types).await?)
        })
        .await?;
        info!(
            universe = %universe.base.name,
            count = dependencies.len(),
            "Found dependencies"
        );

        let options = SyncOptions::forced();
        let mut synced = 0;

        for dependency in &dependencies {
            let selector = Selector::Ids(vec![dependency.id.clone()]);
            let outcome = match &dependency.kind {
                ArtifactKind::Connection => {
                    self.reconciler.reconcile::<Connection>(&selector, &options).await
                }
                ArtifactKind::Universe if dependency.id == universe_id => {
                    info!(universe_id, "Skipping self-reference");
                    continue;
                }
                ArtifactKind::Universe => {
                    self.reconciler.reconcile::<Universe>(&selector, &options).await
                }
                ArtifactKind::Report => {
                    self.reconciler.reconcile::<Report>(&selector, &options).await
                }
                other => {
                    warn!(kind = %other, id = %dependency.id, "Unsupported dependency type");
                    continue;
                }
            };

            match outcome {
                Ok(written) if written > 0 => synced += 1,
                Ok(_) => {}
                Err(e) => error!(
                    kind = %dependency.kind,
                    id = %dependency.id,
                    "Error synchronizing dependency: {}",
                    e
                ),
            }
        }

        info!(universe = %universe.base.name, synced, "Synchronized dependencies");
        Ok(synced)
    }
}
