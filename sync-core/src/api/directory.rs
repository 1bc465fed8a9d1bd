//! Contract of one environment's artifact directory.
//!
//! The engine only ever talks to an environment through this trait, so the
//! REST transport and the in-memory store are interchangeable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::error::Result;
use super::types::*;

#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// Name of the environment this handle is bound to (for logs).
    fn environment(&self) -> &str;

    async fn list_folders(&self, path: Option<&str>) -> Result<Vec<ArtifactRef>>;

    /// Creates the folder when `id` is blank, otherwise updates it.
    async fn save_folder(&self, folder: &ArtifactRef) -> Result<ArtifactRef>;

    async fn list_reports(
        &self,
        folder_id: Option<&str>,
        modified_after: Option<DateTime<Utc>>,
        options: &ListOptions,
    ) -> Result<Vec<Report>>;

    async fn get_report(&self, id: &str) -> Result<Report>;

    async fn save_report(&self, report: &Report) -> Result<Report>;

    async fn get_report_content(&self, id: &str) -> Result<Vec<u8>>;

    async fn list_universes(
        &self,
        folder_id: Option<&str>,
        modified_after: Option<DateTime<Utc>>,
        options: &ListOptions,
    ) -> Result<Vec<Universe>>;

    async fn get_universe(&self, id: &str) -> Result<Universe>;

    async fn save_universe(&self, universe: &Universe) -> Result<Universe>;

    async fn list_connections(
        &self,
        modified_after: Option<DateTime<Utc>>,
        options: &ListOptions,
    ) -> Result<Vec<Connection>>;

    async fn get_connection(&self, id: &str) -> Result<Connection>;

    async fn save_connection(&self, connection: &Connection) -> Result<Connection>;

    async fn search(
        &self,
        query: &str,
        types: Option<&[ArtifactKind]>,
        modified_after: Option<DateTime<Utc>>,
        options: &ListOptions,
    ) -> Result<Vec<ArtifactRef>>;

    /// Type-tagged objects the universe depends on or is used by.
    async fn get_dependencies(
        &self,
        universe_id: &str,
        types: Option<&[ArtifactKind]>,
    ) -> Result<Vec<ArtifactRef>>;

    async fn get_server_config(
        &self,
        config_type: &str,
        options: &ListOptions,
    ) -> Result<serde_json::Value>;

    async fn get_cluster_config(
        &self,
        cluster_id: Option<&str>,
        options: &ListOptions,
    ) -> Result<serde_json::Value>;
}

pub type DirectoryHandle = Arc<dyn DirectoryService>;

/// Produces a handle bound to one configured environment.
pub trait DirectoryFactory: Send + Sync {
    fn connect(&self, name: &str, environment: &crate::config::Environment) -> Result<DirectoryHandle>;
}
