use super::{
    auth::AuthManager,
    crud::CrudOperations,
    directory::{DirectoryFactory, DirectoryHandle, DirectoryService},
    error::*,
    types::*,
};
use crate::config::{ClientSettings, Environment};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::ClientBuilder;
use std::{sync::Arc, time::Duration};
use tracing::debug;

/// Directory service backed by the infostore REST API of one environment.
pub struct BoRestClient {
    name: String,
    crud: CrudOperations,
}

impl BoRestClient {
    pub fn new(
        name: impl Into<String>,
        environment: Environment,
        http_client: reqwest::Client,
        auth_manager: Arc<AuthManager>,
    ) -> Self {
        Self {
            name: name.into(),
            crud: CrudOperations::new(http_client, environment, auth_manager),
        }
    }

    async fn list_entries<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &ListParams,
    ) -> Result<Vec<T>> {
        let envelope: Entries<T> = self.crud.get(path, Some(params)).await?;
        Ok(envelope.entries)
    }

    async fn upsert<T>(&self, collection: &str, id: &str, item: &T) -> Result<T>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        if id.trim().is_empty() {
            debug!("Creating new object in {}", collection);
            self.crud.post(&format!("/infostore/{}", collection), item).await
        } else {
            debug!("Updating {} {}", collection, id);
            self.crud
                .put(&format!("/infostore/{}/{}", collection, id), item)
                .await
        }
    }
}

fn require_id<'a>(id: &'a str, what: &str) -> Result<&'a str> {
    if id.trim().is_empty() {
        Err(DirectoryError::blank_id(what))
    } else {
        Ok(id)
    }
}

#[async_trait]
impl DirectoryService for BoRestClient {
    fn environment(&self) -> &str {
        &self.name
    }

    async fn list_folders(&self, path: Option<&str>) -> Result<Vec<ArtifactRef>> {
        debug!("Getting folders from path: {:?}", path);
        let params = ListParams::new().path(path);
        let folders: Vec<ArtifactRef> = self.list_entries("/infostore/folders", &params).await?;
        Ok(folders
            .into_iter()
            .map(|folder| folder.or_kind(ArtifactKind::Folder))
            .collect())
    }

    async fn save_folder(&self, folder: &ArtifactRef) -> Result<ArtifactRef> {
        let saved: ArtifactRef = self.upsert("folders", &folder.id, folder).await?;
        Ok(saved.or_kind(ArtifactKind::Folder))
    }

    async fn list_reports(
        &self,
        folder_id: Option<&str>,
        modified_after: Option<DateTime<Utc>>,
        options: &ListOptions,
    ) -> Result<Vec<Report>> {
        let params = ListParams::new()
            .folder_id(folder_id)
            .modified_after(modified_after)
            .options(options);
        self.list_entries("/infostore/reports", &params).await
    }

    async fn get_report(&self, id: &str) -> Result<Report> {
        let id = require_id(id, "Report")?;
        self.crud.get(&format!("/infostore/reports/{}", id), None).await
    }

    async fn save_report(&self, report: &Report) -> Result<Report> {
        self.upsert("reports", &report.base.id, report).await
    }

    async fn get_report_content(&self, id: &str) -> Result<Vec<u8>> {
        let id = require_id(id, "Report")?;
        self.crud
            .download(&format!("/infostore/reports/{}/content", id))
            .await
    }

    async fn list_universes(
        &self,
        folder_id: Option<&str>,
        modified_after: Option<DateTime<Utc>>,
        options: &ListOptions,
    ) -> Result<Vec<Universe>> {
        let params = ListParams::new()
            .folder_id(folder_id)
            .modified_after(modified_after)
            .options(options);
        self.list_entries("/infostore/universes", &params).await
    }

    async fn get_universe(&self, id: &str) -> Result<Universe> {
        let id = require_id(id, "Universe")?;
        self.crud.get(&format!("/infostore/universes/{}", id), None).await
    }

    async fn save_universe(&self, universe: &Universe) -> Result<Universe> {
        self.upsert("universes", &universe.base.id, universe).await
    }

    async fn list_connections(
        &self,
        modified_after: Option<DateTime<Utc>>,
        options: &ListOptions,
    ) -> Result<Vec<Connection>> {
        let params = ListParams::new()
            .modified_after(modified_after)
            .options(options);
        self.list_entries("/infostore/connections", &params).await
    }

    async fn get_connection(&self, id: &str) -> Result<Connection> {
        let id = require_id(id, "Connection")?;
        self.crud
            .get(&format!("/infostore/connections/{}", id), None)
            .await
    }

    async fn save_connection(&self, connection: &Connection) -> Result<Connection> {
        self.upsert("connections", &connection.base.id, connection).await
    }

    async fn search(
        &self,
        query: &str,
        types: Option<&[ArtifactKind]>,
        modified_after: Option<DateTime<Utc>>,
        options: &ListOptions,
    ) -> Result<Vec<ArtifactRef>> {
        if query.trim().is_empty() {
            return Err(DirectoryError::Validation(
                "Search query cannot be empty".to_string(),
            ));
        }
        let params = ListParams::new()
            .query(query)
            .types(types)
            .modified_after(modified_after)
            .options(options);
        self.list_entries("/infostore/search", &params).await
    }

    async fn get_dependencies(
        &self,
        universe_id: &str,
        types: Option<&[ArtifactKind]>,
    ) -> Result<Vec<ArtifactRef>> {
        let universe_id = require_id(universe_id, "Universe")?;
        let params = ListParams::new().types(types);
        self.list_entries(
            &format!("/infostore/universes/{}/dependencies", universe_id),
            &params,
        )
        .await
    }

    async fn get_server_config(
        &self,
        config_type: &str,
        options: &ListOptions,
    ) -> Result<serde_json::Value> {
        let mut params = ListParams::new().options(options);
        params
            .options
            .insert("configType".to_string(), config_type.to_string());
        self.crud.get("/infostore/servers/config", Some(&params)).await
    }

    async fn get_cluster_config(
        &self,
        cluster_id: Option<&str>,
        options: &ListOptions,
    ) -> Result<serde_json::Value> {
        let params = ListParams::new().cluster_id(cluster_id).options(options);
        self.crud.get("/infostore/clusters/config", Some(&params)).await
    }
}

/// Builds REST-backed handles that share one HTTP client and token cache.
pub struct RestDirectoryFactory {
    http_client: reqwest::Client,
    auth_manager: Arc<AuthManager>,
}

impl RestDirectoryFactory {
    pub fn new(settings: &ClientSettings) -> Result<Self> {
        RestDirectoryFactoryBuilder::new()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .accept_invalid_certs(settings.accept_invalid_certs)
            .build()
    }

    pub fn with_client(http_client: reqwest::Client) -> Self {
        let auth_manager = Arc::new(AuthManager::new(http_client.clone()));
        Self {
            http_client,
            auth_manager,
        }
    }
}

impl DirectoryFactory for RestDirectoryFactory {
    fn connect(&self, name: &str, environment: &Environment) -> Result<DirectoryHandle> {
        url::Url::parse(&environment.url)?;
        Ok(Arc::new(BoRestClient::new(
            name,
            environment.clone(),
            self.http_client.clone(),
            self.auth_manager.clone(),
        )))
    }
}

// Builder pattern for transport configuration
pub struct RestDirectoryFactoryBuilder {
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    user_agent: Option<String>,
    accept_invalid_certs: bool,
}

impl RestDirectoryFactoryBuilder {
    pub fn new() -> Self {
        Self {
            timeout: None,
            connect_timeout: None,
            user_agent: None,
            accept_invalid_certs: false,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    pub fn build(self) -> Result<RestDirectoryFactory> {
        let mut client_builder = ClientBuilder::new()
            .user_agent(
                self.user_agent
                    .unwrap_or_else(|| "bo-sync/0.1.0".to_string()),
            )
            .danger_accept_invalid_certs(self.accept_invalid_certs);

        if let Some(timeout) = self.timeout {
            client_builder = client_builder.timeout(timeout);
        }

        if let Some(connect_timeout) = self.connect_timeout {
            client_builder = client_builder.connect_timeout(connect_timeout);
        }

        let http_client = client_builder.build().map_err(DirectoryError::Network)?;

        Ok(RestDirectoryFactory::with_client(http_client))
    }
}

impl Default for RestDirectoryFactoryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
