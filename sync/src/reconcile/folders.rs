use bo_sync_core::api::{ArtifactKind, ArtifactRef, DirectoryHandle, ListOptions};
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::options::SyncOptions;
use crate::retry::{with_retry, RetryPolicy};

/// Copies the folder tree.
///
/// Folders are not addressed by a stable ID across environments, so a
/// folder exists in the target when a folder with the same name sits under
/// the same parent. A source folder without a parent matches any parent.
#[derive(Clone)]
pub struct FolderReconciler {
    source: DirectoryHandle,
    target: DirectoryHandle,
    retry: RetryPolicy,
}

impl FolderReconciler {
    pub fn new(source: DirectoryHandle, target: DirectoryHandle, retry: RetryPolicy) -> Self {
        Self {
            source,
            target,
            retry,
        }
    }

    /// Reconciles the folders under `path` (every root when `None`) and
    /// all of their descendants. Returns how many folders were written.
    #[instrument(skip(self, options), fields(force = options.force_update))]
    pub async fn reconcile(&self, path: Option<&str>, options: &SyncOptions) -> Result<usize> {
        let count = with_retry(self.retry, "folders", || self.reconcile_once(path, options)).await?;
        info!(count, "Synchronized folders");
        Ok(count)
    }

    async fn reconcile_once(&self, path: Option<&str>, options: &SyncOptions) -> Result<usize> {
        let roots = self.source.list_folders(path).await?;
        info!(folders = roots.len(), "Found folders in source environment");

        let base_path = path.unwrap_or("").trim_end_matches('/').to_string();
        let mut written = 0;
        let mut stack: Vec<(String, &ArtifactRef)> = roots
            .iter()
            .rev()
            .map(|folder| (format!("{}/{}", base_path, folder.name), folder))
            .collect();

        // Depth-first; children are visited after their parent is written.
        while let Some((folder_path, folder)) = stack.pop() {
            if self.upsert(&folder_path, folder, options.force_update).await {
                written += 1;
            }
            for child in folder.children.iter().rev() {
                stack.push((format!("{}/{}", folder_path, child.name), child));
            }
        }

        Ok(written)
    }

    async fn exists(&self, folder: &ArtifactRef) -> bool {
        let matches = self
            .target
            .search(
                &folder.name,
                Some(&[ArtifactKind::Folder]),
                None,
                &ListOptions::new(),
            )
            .await;

        match matches {
            Ok(candidates) => candidates
                .iter()
                .any(|candidate| same_folder(folder, candidate)),
            Err(e) => {
                debug!(name = %folder.name, "Treating folder as absent: {}", e);
                false
            }
        }
    }

    async fn upsert(&self, path: &str, folder: &ArtifactRef, force: bool) -> bool {
        let exists = self.exists(folder).await;
        if exists && !force {
            debug!(path, "Folder already exists");
            return false;
        }

        let mut payload = folder.clone();
        payload.children.clear();

        match self.target.save_folder(&payload).await {
            Ok(_) => {
                debug!(path, "{} folder", if exists { "Updated" } else { "Created" });
                true
            }
            Err(e) => {
                warn!(path, id = %folder.id, "Error processing folder: {}", e);
                false
            }
        }
    }
}

/// Exact, case-sensitive name match under the same parent.
fn same_folder(source: &ArtifactRef, candidate: &ArtifactRef) -> bool {
    if candidate.name != source.name {
        return false;
    }
    match source.parent_id.as_deref().map(str::trim) {
        None | Some("") => true,
        Some(parent) => candidate.parent_id.as_deref() == Some(parent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bo_sync_core::api::{FailureMode, MemoryDirectory, Operation};
    use std::sync::Arc;
    use std::time::Duration;

    fn setup() -> (Arc<MemoryDirectory>, Arc<MemoryDirectory>, FolderReconciler) {
        let source = Arc::new(MemoryDirectory::new("source"));
        let target = Arc::new(MemoryDirectory::with_journal("target", source.journal().clone()));
        let reconciler = FolderReconciler::new(
            source.clone(),
            target.clone(),
            RetryPolicy {
                max_attempts: 2,
                delay: Duration::from_millis(1),
            },
        );
        (source, target, reconciler)
    }

    fn tree() -> ArtifactRef {
        ArtifactRef::folder("f1", "Sales")
            .with_child(
                ArtifactRef::folder("f2", "EMEA").with_child(ArtifactRef::folder("f3", "France")),
            )
            .with_child(ArtifactRef::folder("f4", "APAC"))
    }

    #[tokio::test]
    async fn test_walks_the_whole_tree() {
        let (source, target, reconciler) = setup();
        source.seed(bo_sync_core::api::Fixture {
            folders: vec![tree()],
            ..Default::default()
        });

        let count = reconciler.reconcile(None, &SyncOptions::default()).await.unwrap();
        assert_eq!(count, 4);
        assert_eq!(target.folders().len(), 4);

        // Parents are written before their children.
        let order: Vec<String> = source
            .journal()
            .writes()
            .into_iter()
            .filter_map(|call| call.id)
            .collect();
        assert_eq!(order, vec!["f1", "f2", "f3", "f4"]);
    }

    #[tokio::test]
    async fn test_second_run_writes_nothing() {
        let (source, _target, reconciler) = setup();
        source.seed(bo_sync_core::api::Fixture {
            folders: vec![tree()],
            ..Default::default()
        });

        reconciler.reconcile(None, &SyncOptions::default()).await.unwrap();
        let again = reconciler.reconcile(None, &SyncOptions::default()).await.unwrap();
        assert_eq!(again, 0);

        let forced = reconciler.reconcile(None, &SyncOptions::forced()).await.unwrap();
        assert_eq!(forced, 4);
    }

    #[tokio::test]
    async fn test_path_scopes_the_walk() {
        let (source, target, reconciler) = setup();
        source.seed(bo_sync_core::api::Fixture {
            folders: vec![tree()],
            ..Default::default()
        });

        let count = reconciler.reconcile(Some("f2"), &SyncOptions::default()).await.unwrap();
        assert_eq!(count, 2);
        assert!(target.folders().iter().all(|f| f.id == "f2" || f.id == "f3"));
    }

    #[tokio::test]
    async fn test_listing_failure_is_retried() {
        let (source, _target, reconciler) = setup();
        source.insert_folder(ArtifactRef::folder("f1", "Sales"));
        source.fail(Operation::ListFolders, FailureMode::Transient, Some(1));

        let count = reconciler.reconcile(None, &SyncOptions::default()).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(source.journal().count("source", Operation::ListFolders), 2);
    }

    #[test]
    fn test_same_folder_rules() {
        let rootless = ArtifactRef::folder("a", "Sales");
        let under_x = ArtifactRef::folder("b", "Sales").with_parent("x");

        assert!(same_folder(&rootless, &under_x));
        assert!(same_folder(&under_x, &ArtifactRef::folder("c", "Sales").with_parent("x")));
        assert!(!same_folder(&under_x, &ArtifactRef::folder("c", "Sales").with_parent("y")));
        assert!(!same_folder(&rootless, &ArtifactRef::folder("d", "sales")));
    }
}
