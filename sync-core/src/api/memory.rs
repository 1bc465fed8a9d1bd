//! In-memory directory.
//!
//! Backs the `memory` client backend and every engine test. All handles
//! created from one [`MemoryDirectoryFactory`] append to the same
//! [`CallJournal`], so tests can assert on the order of calls across
//! environments.

use super::{
    directory::{DirectoryFactory, DirectoryHandle, DirectoryService},
    error::*,
    types::*,
};
use crate::config::Environment;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListFolders,
    SaveFolder,
    ListReports,
    GetReport,
    SaveReport,
    GetReportContent,
    ListUniverses,
    GetUniverse,
    SaveUniverse,
    ListConnections,
    GetConnection,
    SaveConnection,
    Search,
    GetDependencies,
    GetServerConfig,
    GetClusterConfig,
}

impl Operation {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Operation::SaveFolder
                | Operation::SaveReport
                | Operation::SaveUniverse
                | Operation::SaveConnection
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub environment: String,
    pub operation: Operation,
    pub id: Option<String>,
}

/// Ordered record of every call made through a set of memory directories.
#[derive(Debug, Clone, Default)]
pub struct CallJournal {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallJournal {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, environment: &str, operation: Operation, id: Option<&str>) {
        self.calls.lock().push(Call {
            environment: environment.to_string(),
            operation,
            id: id.map(str::to_string),
        });
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn writes(&self) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.operation.is_write())
            .cloned()
            .collect()
    }

    pub fn count(&self, environment: &str, operation: Operation) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.environment == environment && c.operation == operation)
            .count()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Surfaces as a 503 server error.
    Transient,
    /// Surfaces as a validation error.
    Permanent,
}

#[derive(Debug, Clone)]
struct Injection {
    operation: Operation,
    id: Option<String>,
    mode: FailureMode,
    remaining: Option<usize>,
}

/// Seed data for a memory directory, as read from a JSON fixture.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fixture {
    #[serde(default)]
    pub folders: Vec<ArtifactRef>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub universes: Vec<Universe>,
    #[serde(default)]
    pub reports: Vec<Report>,
    #[serde(default)]
    pub dependencies: HashMap<String, Vec<ArtifactRef>>,
    #[serde(default)]
    pub server_config: Option<serde_json::Value>,
    #[serde(default)]
    pub cluster_config: Option<serde_json::Value>,
}

#[derive(Default)]
struct Store {
    folders: BTreeMap<String, ArtifactRef>,
    reports: BTreeMap<String, Report>,
    report_content: HashMap<String, Vec<u8>>,
    universes: BTreeMap<String, Universe>,
    connections: BTreeMap<String, Connection>,
    dependencies: HashMap<String, Vec<ArtifactRef>>,
    server_config: Option<serde_json::Value>,
    cluster_config: Option<serde_json::Value>,
}

pub struct MemoryDirectory {
    name: String,
    journal: CallJournal,
    store: RwLock<Store>,
    injections: Mutex<Vec<Injection>>,
}

impl MemoryDirectory {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_journal(name, CallJournal::new())
    }

    pub fn with_journal(name: impl Into<String>, journal: CallJournal) -> Self {
        Self {
            name: name.into(),
            journal,
            store: RwLock::new(Store::default()),
            injections: Mutex::new(Vec::new()),
        }
    }

    pub fn journal(&self) -> &CallJournal {
        &self.journal
    }

    pub fn seed(&self, fixture: Fixture) {
        for folder in fixture.folders {
            self.insert_folder_tree(folder, None);
        }
        for connection in fixture.connections {
            self.insert_connection(connection);
        }
        for universe in fixture.universes {
            self.insert_universe(universe);
        }
        for report in fixture.reports {
            self.insert_report(report);
        }
        let mut store = self.store.write();
        store.dependencies.extend(fixture.dependencies);
        if fixture.server_config.is_some() {
            store.server_config = fixture.server_config;
        }
        if fixture.cluster_config.is_some() {
            store.cluster_config = fixture.cluster_config;
        }
    }

    pub fn load_fixture(&self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DirectoryError::Unknown(format!("{}: {}", path.display(), e)))?;
        let fixture: Fixture = serde_json::from_str(&content)?;
        debug!("Seeding {} from {}", self.name, path.display());
        self.seed(fixture);
        Ok(())
    }

    // Nested children are stored flat, linked through `parent_id`.
    fn insert_folder_tree(&self, mut folder: ArtifactRef, parent_id: Option<&str>) {
        if let Some(parent_id) = parent_id {
            folder.parent_id = Some(parent_id.to_string());
        }
        let children = std::mem::take(&mut folder.children);
        let id = folder.id.clone();
        self.insert_folder(folder);
        for child in children {
            self.insert_folder_tree(child, Some(&id));
        }
    }

    pub fn insert_folder(&self, mut folder: ArtifactRef) {
        folder.kind = ArtifactKind::Folder;
        folder.children.clear();
        self.store.write().folders.insert(folder.id.clone(), folder);
    }

    pub fn insert_report(&self, report: Report) {
        self.store
            .write()
            .reports
            .insert(report.base.id.clone(), report);
    }

    pub fn insert_universe(&self, universe: Universe) {
        self.store
            .write()
            .universes
            .insert(universe.base.id.clone(), universe);
    }

    pub fn insert_connection(&self, connection: Connection) {
        self.store
            .write()
            .connections
            .insert(connection.base.id.clone(), connection);
    }

    pub fn set_report_content(&self, id: impl Into<String>, content: Vec<u8>) {
        self.store.write().report_content.insert(id.into(), content);
    }

    pub fn set_dependencies(&self, universe_id: impl Into<String>, dependencies: Vec<ArtifactRef>) {
        self.store
            .write()
            .dependencies
            .insert(universe_id.into(), dependencies);
    }

    pub fn set_server_config(&self, config: serde_json::Value) {
        self.store.write().server_config = Some(config);
    }

    pub fn set_cluster_config(&self, config: serde_json::Value) {
        self.store.write().cluster_config = Some(config);
    }

    pub fn folders(&self) -> Vec<ArtifactRef> {
        self.store.read().folders.values().cloned().collect()
    }

    pub fn reports(&self) -> Vec<Report> {
        self.store.read().reports.values().cloned().collect()
    }

    pub fn universes(&self) -> Vec<Universe> {
        self.store.read().universes.values().cloned().collect()
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.store.read().connections.values().cloned().collect()
    }

    /// Makes `operation` fail. `times = None` fails forever.
    pub fn fail(&self, operation: Operation, mode: FailureMode, times: Option<usize>) {
        self.push_injection(operation, None, mode, times);
    }

    /// Like [`fail`](Self::fail) but only for calls naming `id`.
    pub fn fail_on(
        &self,
        operation: Operation,
        id: impl Into<String>,
        mode: FailureMode,
        times: Option<usize>,
    ) {
        self.push_injection(operation, Some(id.into()), mode, times);
    }

    pub fn clear_failures(&self) {
        self.injections.lock().clear();
    }

    fn push_injection(
        &self,
        operation: Operation,
        id: Option<String>,
        mode: FailureMode,
        remaining: Option<usize>,
    ) {
        self.injections.lock().push(Injection {
            operation,
            id,
            mode,
            remaining,
        });
    }

    /// Journals the call, then applies the first matching injection.
    fn enter(&self, operation: Operation, id: Option<&str>) -> Result<()> {
        self.journal.record(&self.name, operation, id);

        let mut injections = self.injections.lock();
        let position = injections.iter().position(|injection| {
            injection.operation == operation
                && injection.remaining != Some(0)
                && match (&injection.id, id) {
                    (None, _) => true,
                    (Some(wanted), Some(actual)) => wanted == actual,
                    (Some(_), None) => false,
                }
        });

        let Some(position) = position else {
            return Ok(());
        };
        let injection = &mut injections[position];
        if let Some(remaining) = injection.remaining.as_mut() {
            *remaining -= 1;
        }

        Err(match injection.mode {
            FailureMode::Transient => DirectoryError::Server {
                status: 503,
                message: format!("{} unavailable", self.name),
            },
            FailureMode::Permanent => {
                DirectoryError::Validation(format!("{:?} rejected by {}", operation, self.name))
            }
        })
    }

    fn folder_tree(&self, store: &Store, folder: &ArtifactRef) -> ArtifactRef {
        let mut node = folder.clone();
        node.children = store
            .folders
            .values()
            .filter(|f| f.parent_id.as_deref() == Some(folder.id.as_str()))
            .map(|child| self.folder_tree(store, child))
            .collect();
        node
    }
}

fn assign_id(id: &mut String) {
    if id.trim().is_empty() {
        *id = uuid::Uuid::new_v4().to_string();
    }
}

fn require_id(id: &str, what: &str) -> Result<()> {
    if id.trim().is_empty() {
        Err(DirectoryError::blank_id(what))
    } else {
        Ok(())
    }
}

fn in_folder(base: &ArtifactRef, folder_id: Option<&str>) -> bool {
    match folder_id {
        Some(folder_id) => base.parent_id.as_deref() == Some(folder_id),
        None => true,
    }
}

fn kind_allowed(kind: &ArtifactKind, types: Option<&[ArtifactKind]>) -> bool {
    types.map_or(true, |types| types.is_empty() || types.contains(kind))
}

#[async_trait]
impl DirectoryService for MemoryDirectory {
    fn environment(&self) -> &str {
        &self.name
    }

    async fn list_folders(&self, path: Option<&str>) -> Result<Vec<ArtifactRef>> {
        self.enter(Operation::ListFolders, path)?;
        let store = self.store.read();

        let roots: Vec<&ArtifactRef> = match path {
            Some(path) => store
                .folders
                .values()
                .filter(|f| f.path.as_deref() == Some(path) || f.id == path)
                .collect(),
            None => store
                .folders
                .values()
                .filter(|f| {
                    f.parent_id
                        .as_deref()
                        .map_or(true, |parent| !store.folders.contains_key(parent))
                })
                .collect(),
        };

        Ok(roots
            .into_iter()
            .map(|root| self.folder_tree(&store, root))
            .collect())
    }

    async fn save_folder(&self, folder: &ArtifactRef) -> Result<ArtifactRef> {
        self.enter(Operation::SaveFolder, Some(&folder.id))?;
        let mut saved = folder.clone();
        assign_id(&mut saved.id);
        self.insert_folder(saved.clone());
        saved.children.clear();
        Ok(saved)
    }

    async fn list_reports(
        &self,
        folder_id: Option<&str>,
        modified_after: Option<DateTime<Utc>>,
        _options: &ListOptions,
    ) -> Result<Vec<Report>> {
        self.enter(Operation::ListReports, folder_id)?;
        Ok(self
            .store
            .read()
            .reports
            .values()
            .filter(|r| in_folder(&r.base, folder_id) && r.base.modified_after(modified_after))
            .cloned()
            .collect())
    }

    async fn get_report(&self, id: &str) -> Result<Report> {
        self.enter(Operation::GetReport, Some(id))?;
        require_id(id, "Report")?;
        self.store
            .read()
            .reports
            .get(id)
            .cloned()
            .ok_or(DirectoryError::NotFound)
    }

    async fn save_report(&self, report: &Report) -> Result<Report> {
        self.enter(Operation::SaveReport, Some(&report.base.id))?;
        let mut saved = report.clone();
        assign_id(&mut saved.base.id);
        self.insert_report(saved.clone());
        Ok(saved)
    }

    async fn get_report_content(&self, id: &str) -> Result<Vec<u8>> {
        self.enter(Operation::GetReportContent, Some(id))?;
        require_id(id, "Report")?;
        let store = self.store.read();
        if let Some(content) = store.report_content.get(id) {
            return Ok(content.clone());
        }
        store
            .reports
            .get(id)
            .map(|r| r.content.clone().unwrap_or_default().into_bytes())
            .ok_or(DirectoryError::NotFound)
    }

    async fn list_universes(
        &self,
        folder_id: Option<&str>,
        modified_after: Option<DateTime<Utc>>,
        _options: &ListOptions,
    ) -> Result<Vec<Universe>> {
        self.enter(Operation::ListUniverses, folder_id)?;
        Ok(self
            .store
            .read()
            .universes
            .values()
            .filter(|u| in_folder(&u.base, folder_id) && u.base.modified_after(modified_after))
            .cloned()
            .collect())
    }

    async fn get_universe(&self, id: &str) -> Result<Universe> {
        self.enter(Operation::GetUniverse, Some(id))?;
        require_id(id, "Universe")?;
        self.store
            .read()
            .universes
            .get(id)
            .cloned()
            .ok_or(DirectoryError::NotFound)
    }

    async fn save_universe(&self, universe: &Universe) -> Result<Universe> {
        self.enter(Operation::SaveUniverse, Some(&universe.base.id))?;
        let mut saved = universe.clone();
        assign_id(&mut saved.base.id);
        self.insert_universe(saved.clone());
        Ok(saved)
    }

    async fn list_connections(
        &self,
        modified_after: Option<DateTime<Utc>>,
        _options: &ListOptions,
    ) -> Result<Vec<Connection>> {
        self.enter(Operation::ListConnections, None)?;
        Ok(self
            .store
            .read()
            .connections
            .values()
            .filter(|c| c.base.modified_after(modified_after))
            .cloned()
            .collect())
    }

    async fn get_connection(&self, id: &str) -> Result<Connection> {
        self.enter(Operation::GetConnection, Some(id))?;
        require_id(id, "Connection")?;
        self.store
            .read()
            .connections
            .get(id)
            .cloned()
            .ok_or(DirectoryError::NotFound)
    }

    async fn save_connection(&self, connection: &Connection) -> Result<Connection> {
        self.enter(Operation::SaveConnection, Some(&connection.base.id))?;
        let mut saved = connection.clone();
        assign_id(&mut saved.base.id);
        self.insert_connection(saved.clone());
        Ok(saved)
    }

    async fn search(
        &self,
        query: &str,
        types: Option<&[ArtifactKind]>,
        modified_after: Option<DateTime<Utc>>,
        _options: &ListOptions,
    ) -> Result<Vec<ArtifactRef>> {
        self.enter(Operation::Search, Some(query))?;
        if query.trim().is_empty() {
            return Err(DirectoryError::Validation(
                "Search query cannot be empty".to_string(),
            ));
        }

        let needle = query.trim().to_lowercase();
        let matches = |base: &ArtifactRef| {
            (needle == "*" || base.name.to_lowercase().contains(&needle))
                && kind_allowed(&base.kind, types)
                && base.modified_after(modified_after)
        };

        let store = self.store.read();
        let mut found: Vec<ArtifactRef> = Vec::new();
        found.extend(store.folders.values().filter(|f| matches(f)).cloned());
        found.extend(store.connections.values().map(|c| &c.base).filter(|b| matches(b)).cloned());
        found.extend(store.universes.values().map(|u| &u.base).filter(|b| matches(b)).cloned());
        found.extend(store.reports.values().map(|r| &r.base).filter(|b| matches(b)).cloned());
        Ok(found)
    }

    async fn get_dependencies(
        &self,
        universe_id: &str,
        types: Option<&[ArtifactKind]>,
    ) -> Result<Vec<ArtifactRef>> {
        self.enter(Operation::GetDependencies, Some(universe_id))?;
        require_id(universe_id, "Universe")?;
        Ok(self
            .store
            .read()
            .dependencies
            .get(universe_id)
            .map(|deps| {
                deps.iter()
                    .filter(|d| kind_allowed(&d.kind, types))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_server_config(
        &self,
        config_type: &str,
        _options: &ListOptions,
    ) -> Result<serde_json::Value> {
        self.enter(Operation::GetServerConfig, Some(config_type))?;
        Ok(self
            .store
            .read()
            .server_config
            .clone()
            .unwrap_or_else(|| serde_json::json!({})))
    }

    async fn get_cluster_config(
        &self,
        cluster_id: Option<&str>,
        _options: &ListOptions,
    ) -> Result<serde_json::Value> {
        self.enter(Operation::GetClusterConfig, cluster_id)?;
        Ok(self
            .store
            .read()
            .cluster_config
            .clone()
            .unwrap_or_else(|| serde_json::json!({})))
    }
}

/// Hands out one memory directory per environment name.
///
/// Directories registered up front are returned as-is; others are created
/// on first use and seeded from the environment's fixture file.
#[derive(Default)]
pub struct MemoryDirectoryFactory {
    journal: CallJournal,
    directories: Mutex<HashMap<String, Arc<MemoryDirectory>>>,
}

impl MemoryDirectoryFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn journal(&self) -> &CallJournal {
        &self.journal
    }

    /// Returns the directory for `name`, creating an empty one if needed.
    pub fn directory(&self, name: &str) -> Arc<MemoryDirectory> {
        self.directories
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryDirectory::with_journal(name, self.journal.clone())))
            .clone()
    }
}

impl DirectoryFactory for MemoryDirectoryFactory {
    fn connect(&self, name: &str, environment: &Environment) -> Result<DirectoryHandle> {
        let mut directories = self.directories.lock();
        if let Some(existing) = directories.get(name) {
            return Ok(existing.clone());
        }

        let directory = Arc::new(MemoryDirectory::with_journal(name, self.journal.clone()));
        if let Some(fixture) = &environment.fixture {
            directory.load_fixture(fixture)?;
        }
        directories.insert(name.to_string(), directory.clone());
        Ok(directory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_folder_tree_is_rebuilt_from_parent_links() {
        let dir = MemoryDirectory::new("source");
        dir.seed(Fixture {
            folders: vec![ArtifactRef::folder("f1", "Sales")
                .with_child(ArtifactRef::folder("f2", "EMEA"))],
            ..Default::default()
        });

        let roots = dir.list_folders(None).await.unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].children.len(), 1);
        assert_eq!(roots[0].children[0].parent_id.as_deref(), Some("f1"));
        assert_eq!(dir.folders().len(), 2);
    }

    #[tokio::test]
    async fn test_save_assigns_id_when_blank() {
        let dir = MemoryDirectory::new("target");
        let saved = dir.save_report(&Report::new("", "Revenue")).await.unwrap();
        assert!(!saved.base.id.is_empty());
        assert_eq!(dir.get_report(&saved.base.id).await.unwrap().base.name, "Revenue");
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let dir = MemoryDirectory::new("target");
        let err = dir.get_universe("u404").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_injected_failures_are_counted_down() {
        let dir = MemoryDirectory::new("source");
        dir.fail(Operation::ListConnections, FailureMode::Transient, Some(1));

        let first = dir.list_connections(None, &ListOptions::new()).await;
        assert!(first.unwrap_err().is_transient());
        assert!(dir.list_connections(None, &ListOptions::new()).await.is_ok());
        assert_eq!(dir.journal().count("source", Operation::ListConnections), 2);
    }

    #[tokio::test]
    async fn test_failure_scoped_to_id() {
        let dir = MemoryDirectory::new("target");
        dir.fail_on(Operation::SaveReport, "r2", FailureMode::Permanent, None);

        assert!(dir.save_report(&Report::new("r1", "A")).await.is_ok());
        let err = dir.save_report(&Report::new("r2", "B")).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_factory_shares_journal_and_loads_fixture() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("source.json");
        std::fs::write(
            &path,
            r#"{"reports":[{"id":"r1","name":"Revenue","type":"Webi"}],
                "serverConfig":{"version":"4.3"}}"#,
        )
        .unwrap();

        let factory = MemoryDirectoryFactory::new();
        let mut environment = Environment::new("http://localhost", "admin", "");
        environment.fixture = Some(path);

        let source = factory.connect("source", &environment).unwrap();
        let target = factory.connect("target", &Environment::new("http://localhost", "admin", "")).unwrap();

        let report = source.get_report("r1").await.unwrap();
        assert_eq!(report.base.kind, ArtifactKind::Report);
        let config = source.get_server_config("server", &ListOptions::new()).await.unwrap();
        assert_eq!(config["version"], "4.3");
        assert!(target.get_report("r1").await.is_err());

        let calls = factory.journal().calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2].environment, "target");
    }

    #[tokio::test]
    async fn test_search_matches_name_and_type() {
        let dir = MemoryDirectory::new("source");
        dir.insert_report(Report::new("r1", "Sales Summary"));
        dir.insert_universe(Universe::new("u1", "Sales"));

        let all = dir.search("sales", None, None, &ListOptions::new()).await.unwrap();
        assert_eq!(all.len(), 2);

        let only_reports = dir
            .search("sales", Some(&[ArtifactKind::Report]), None, &ListOptions::new())
            .await
            .unwrap();
        assert_eq!(only_reports.len(), 1);
        assert!(dir.search(" ", None, None, &ListOptions::new()).await.is_err());
    }
}
