//! End-to-end engine scenarios over in-memory environments

use std::sync::Arc;
use std::time::Duration;

use bo_sync_core::api::{
    ArtifactKind, ArtifactRef, Call, Connection, FailureMode, MemoryDirectory,
    MemoryDirectoryFactory, Operation, Report, Universe,
};
use bo_sync_core::config::{Environment, ObjectToggles};
use chrono::{TimeZone, Utc};

use crate::environment::EnvironmentResolver;
use crate::error::SyncError;
use crate::options::SyncOptions;
use crate::orchestrator::{OrchestratorSettings, SyncOrchestrator};
use crate::retry::RetryPolicy;
use crate::scheduler::{join_run, SyncScheduler};

struct World {
    factory: Arc<MemoryDirectoryFactory>,
    source: Arc<MemoryDirectory>,
    target: Arc<MemoryDirectory>,
    orchestrator: SyncOrchestrator,
}

impl World {
    fn new() -> Self {
        Self::with_objects(ObjectToggles::default())
    }

    fn with_objects(objects: ObjectToggles) -> Self {
        let factory = Arc::new(MemoryDirectoryFactory::new());
        let source = factory.directory("source");
        let target = factory.directory("target");
        let resolver = EnvironmentResolver::new(
            Environment::new("http://bo-dev.local/biprws", "admin", ""),
            Environment::new("http://bo-prod.local/biprws", "admin", ""),
            Default::default(),
            factory.clone(),
        );
        let settings = OrchestratorSettings {
            batch_size: 2,
            objects,
            retry: RetryPolicy {
                max_attempts: 3,
                delay: Duration::from_millis(1),
            },
        };
        Self {
            factory,
            source,
            target,
            orchestrator: SyncOrchestrator::new(resolver, settings),
        }
    }

    /// Source holds c1, u1 -> c1 and r1 -> u1.
    fn seed_chain(&self) {
        self.source.insert_connection(Connection::new("c1", "Warehouse"));
        self.source
            .insert_universe(Universe::new("u1", "Sales").on_connection("c1"));
        self.source
            .insert_report(Report::new("r1", "Revenue").on_universe("u1"));
    }

    fn calls(&self) -> Vec<Call> {
        self.factory.journal().calls()
    }

    fn writes(&self) -> Vec<(Operation, String)> {
        self.factory
            .journal()
            .writes()
            .into_iter()
            .map(|call| (call.operation, call.id.unwrap_or_default()))
            .collect()
    }
}

fn kind_of(operation: Operation) -> Option<ArtifactKind> {
    use Operation::*;
    match operation {
        ListConnections | GetConnection | SaveConnection => Some(ArtifactKind::Connection),
        ListUniverses | GetUniverse | SaveUniverse => Some(ArtifactKind::Universe),
        ListReports | GetReport | SaveReport => Some(ArtifactKind::Report),
        _ => None,
    }
}

#[tokio::test]
async fn test_sync_all_copies_the_chain_in_dependency_order() {
    let world = World::new();
    world.seed_chain();

    let count = world.orchestrator.sync_all(false).await.unwrap();

    assert_eq!(count, 3);
    assert_eq!(
        world.writes(),
        vec![
            (Operation::SaveConnection, "c1".to_string()),
            (Operation::SaveUniverse, "u1".to_string()),
            (Operation::SaveReport, "r1".to_string()),
        ]
    );
    assert_eq!(world.target.universes()[0].connection_id.as_deref(), Some("c1"));
}

#[tokio::test]
async fn test_type_steps_never_interleave() {
    let world = World::new();
    world.seed_chain();
    world.source.insert_connection(Connection::new("c2", "Staging"));
    world.source.insert_report(Report::new("r2", "Margin"));
    world.source.insert_report(Report::new("r3", "Churn"));

    world.orchestrator.sync_all(true).await.unwrap();

    let kinds: Vec<ArtifactKind> = world
        .calls()
        .into_iter()
        .filter_map(|call| kind_of(call.operation))
        .collect();
    let last = |kind: &ArtifactKind| kinds.iter().rposition(|k| k == kind).unwrap();
    let first = |kind: &ArtifactKind| kinds.iter().position(|k| k == kind).unwrap();

    assert!(last(&ArtifactKind::Connection) < first(&ArtifactKind::Universe));
    assert!(last(&ArtifactKind::Universe) < first(&ArtifactKind::Report));
}

#[tokio::test]
async fn test_existing_report_is_not_rewritten() {
    let world = World::new();
    world.source.insert_report(Report::new("r1", "Revenue"));
    world.source.insert_report(Report::new("r2", "Margin"));
    world.target.insert_report(Report::new("r1", "Revenue"));

    let count = world
        .orchestrator
        .sync_reports(None, SyncOptions::default())
        .await
        .unwrap();

    assert_eq!(count, 1);
    assert_eq!(world.writes(), vec![(Operation::SaveReport, "r2".to_string())]);
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let world = World::new();
    world.seed_chain();
    world
        .source
        .insert_folder(ArtifactRef::folder("f1", "Finance"));

    let first = world.orchestrator.sync_all(false).await.unwrap();
    assert_eq!(first, 4);

    world.factory.journal().clear();
    let second = world.orchestrator.sync_all(false).await.unwrap();
    assert_eq!(second, 0);
    assert!(world.writes().is_empty());
}

#[tokio::test]
async fn test_forced_run_rewrites_every_candidate() {
    let world = World::new();
    world.seed_chain();
    world.orchestrator.sync_all(false).await.unwrap();

    let forced = world.orchestrator.sync_all(true).await.unwrap();
    assert_eq!(forced, 3);

    let reports = world
        .orchestrator
        .sync_reports(Some(vec!["r1".to_string()]), SyncOptions::forced())
        .await
        .unwrap();
    assert_eq!(reports, 1);
}

#[tokio::test]
async fn test_failed_step_short_circuits_later_steps() {
    let world = World::new();
    world.seed_chain();
    world
        .source
        .fail(Operation::ListUniverses, FailureMode::Permanent, None);

    let err = world.orchestrator.sync_all(false).await.unwrap_err();
    assert!(matches!(err, SyncError::Directory(_)));

    // Connections were written, nothing touched reports.
    assert_eq!(world.target.connections().len(), 1);
    assert!(world
        .calls()
        .iter()
        .all(|call| kind_of(call.operation) != Some(ArtifactKind::Report)));
    // Permanent failures are not retried.
    assert_eq!(
        world.factory.journal().count("source", Operation::ListUniverses),
        1
    );
}

#[tokio::test]
async fn test_transient_listing_failure_is_retried() {
    let world = World::new();
    world.seed_chain();
    world
        .source
        .fail(Operation::ListReports, FailureMode::Transient, Some(2));

    let count = world
        .orchestrator
        .sync_reports(None, SyncOptions::default())
        .await
        .unwrap();

    assert_eq!(count, 1);
    assert_eq!(
        world.factory.journal().count("source", Operation::ListReports),
        3
    );
}

#[tokio::test]
async fn test_retries_are_exhausted_after_three_attempts() {
    let world = World::new();
    world.seed_chain();
    world
        .source
        .fail(Operation::ListConnections, FailureMode::Transient, None);

    let err = world
        .orchestrator
        .sync_connections(None, SyncOptions::default())
        .await
        .unwrap_err();

    assert!(err.is_transient());
    assert_eq!(
        world.factory.journal().count("source", Operation::ListConnections),
        3
    );
    assert!(world.target.connections().is_empty());
}

#[tokio::test]
async fn test_retry_after_partial_point_reads_does_not_double_count() {
    let world = World::new();
    world.source.insert_report(Report::new("r1", "Revenue"));
    world.source.insert_report(Report::new("r2", "Margin"));
    // The second point read fails once, before anything is written.
    world
        .source
        .fail_on(Operation::GetReport, "r2", FailureMode::Transient, Some(1));

    let count = world
        .orchestrator
        .sync_reports(
            Some(vec!["r1".to_string(), "r2".to_string()]),
            SyncOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(count, 2);
    assert_eq!(world.writes().len(), 2);
}

#[tokio::test]
async fn test_disabled_types_are_skipped() {
    let world = World::with_objects(ObjectToggles {
        folders: true,
        connections: true,
        universes: true,
        reports: false,
    });
    world.seed_chain();

    let count = world.orchestrator.sync_all(false).await.unwrap();
    assert_eq!(count, 2);
    assert_eq!(
        world.factory.journal().count("source", Operation::ListReports),
        0
    );
}

#[tokio::test]
async fn test_incremental_filters_by_time_and_folder() {
    let world = World::new();
    let cutoff = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    let before = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
    let after = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();

    world.source.insert_folder(ArtifactRef::folder("sales", "Sales"));
    world.source.insert_connection({
        let mut c = Connection::new("c-new", "New");
        c.base.modified = Some(after);
        c
    });
    world.source.insert_connection({
        let mut c = Connection::new("c-old", "Old");
        c.base.modified = Some(before);
        c
    });
    for (id, folder, modified) in [
        ("r-in-new", "sales", after),
        ("r-in-old", "sales", before),
        ("r-out-new", "hr", after),
    ] {
        let mut report = Report::new(id, id);
        report.base.parent_id = Some(folder.to_string());
        report.base.modified = Some(modified);
        world.source.insert_report(report);
    }

    let count = world
        .orchestrator
        .sync_incremental(Some(cutoff), Some(vec!["sales".to_string()]), false)
        .await
        .unwrap();

    // folder "sales", c-new, r-in-new
    assert_eq!(count, 3);
    let mut written: Vec<String> = world.writes().into_iter().map(|(_, id)| id).collect();
    written.sort();
    assert_eq!(written, vec!["c-new", "r-in-new", "sales"]);
}

#[tokio::test]
async fn test_folder_matching_is_by_exact_name_under_parent() {
    let world = World::new();
    world
        .source
        .insert_folder(ArtifactRef::folder("s1", "Reports").with_parent("root"));
    world
        .source
        .insert_folder(ArtifactRef::folder("s2", "Archive").with_parent("root"));

    // Two target folders share the name; either one counts as a match.
    world
        .target
        .insert_folder(ArtifactRef::folder("t1", "Reports").with_parent("root"));
    world
        .target
        .insert_folder(ArtifactRef::folder("t2", "Reports").with_parent("root"));
    // Differs only by case, so it does not match.
    world
        .target
        .insert_folder(ArtifactRef::folder("t3", "archive").with_parent("root"));

    let count = world
        .orchestrator
        .sync_folders(None, SyncOptions::default())
        .await
        .unwrap();

    assert_eq!(count, 1);
    assert_eq!(world.writes(), vec![(Operation::SaveFolder, "s2".to_string())]);
}

#[tokio::test]
async fn test_dependencies_skip_the_root_universe() {
    let world = World::new();
    world.seed_chain();
    world.source.set_dependencies(
        "u1",
        vec![
            ArtifactRef::new(ArtifactKind::Universe, "u1", "Sales"),
            ArtifactRef::new(ArtifactKind::Connection, "c1", "Warehouse"),
            ArtifactRef::new(ArtifactKind::Report, "r1", "Revenue"),
        ],
    );

    let count = world
        .orchestrator
        .sync_universe_dependencies("u1", None)
        .await
        .unwrap();

    assert_eq!(count, 2);
    assert!(world.target.universes().is_empty());
    assert!(matches!(
        world.orchestrator.sync_universe_dependencies(" ", None).await,
        Err(SyncError::Validation(_))
    ));
}

#[tokio::test]
async fn test_search_goes_to_source() {
    let world = World::new();
    world.seed_chain();
    world.target.insert_report(Report::new("r9", "Revenue (prod)"));

    let found = world
        .orchestrator
        .search("revenue", None, None, &Default::default())
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, "r1");

    assert!(matches!(
        world
            .orchestrator
            .search("  ", None, None, &Default::default())
            .await,
        Err(SyncError::Validation(_))
    ));
}

#[tokio::test]
async fn test_scheduler_drives_the_orchestrator() {
    let world = World::new();
    world.seed_chain();
    let scheduler = SyncScheduler::new(Arc::new(world.orchestrator.clone()), true, "0 0 1 * * *");

    let handle = scheduler.trigger_sync(false).unwrap();
    assert_eq!(join_run(handle).await.unwrap(), 3);

    let status = scheduler.status();
    assert!(!status.in_progress);
    assert_eq!(status.last_sync_count, 3);

    let handle = scheduler.tick().unwrap();
    assert_eq!(join_run(handle).await.unwrap(), 0);
    assert_eq!(scheduler.status().last_sync_count, 0);
}
