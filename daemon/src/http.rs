//! HTTP control surface.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bo_sync::{join_run, SyncError, SyncOrchestrator, SyncOptions, SyncScheduler, SyncStatus};
use bo_sync_core::api::{ArtifactKind, ArtifactRef, DirectoryError, ListOptions};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::telemetry::{metrics_handler, DaemonMetrics};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: SyncOrchestrator,
    pub scheduler: SyncScheduler,
    pub metrics: DaemonMetrics,
}

pub fn router(state: AppState) -> Router {
    let metrics = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(state.metrics.clone());

    Router::new()
        .route("/health", get(health))
        .route("/sync", post(trigger_sync))
        .route("/sync/status", get(status))
        .route("/sync/incremental", post(trigger_incremental))
        .route("/sync/reports", post(sync_reports))
        .route("/sync/universes", post(sync_universes))
        .route("/sync/connections", post(sync_connections))
        .route("/sync/folders", post(sync_folders))
        .route("/sync/universes/:id/dependencies", post(sync_dependencies))
        .route("/sync/search", get(search))
        .route("/sync/compare/server", get(compare_server))
        .route("/sync/compare/cluster", get(compare_cluster))
        .route("/sync/compare/configs", get(compare_configs))
        .with_state(state)
        .merge(metrics)
        .layer(TraceLayer::new_for_http())
}

/// Engine error rendered as `{timestamp, status, error, message}`.
#[derive(Debug)]
pub struct ApiError(SyncError);

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            SyncError::AlreadyInProgress => StatusCode::CONFLICT,
            SyncError::Validation(_)
            | SyncError::UnknownEnvironment(_)
            | SyncError::UnsupportedConfigType(_) => StatusCode::BAD_REQUEST,
            SyncError::NotFound { .. } | SyncError::Directory(DirectoryError::NotFound) => {
                StatusCode::NOT_FOUND
            }
            SyncError::Directory(_) => StatusCode::BAD_GATEWAY,
            SyncError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            info!("Request rejected: {}", self.0);
        }

        let body = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "status": status.as_u16(),
            "error": status.canonical_reason().unwrap_or("Error"),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
struct Completed {
    status: &'static str,
    count: usize,
    message: String,
}

impl Completed {
    fn new(count: usize, noun: &str) -> Json<Self> {
        Json(Self {
            status: "completed",
            count,
            message: format!("Synchronized {} {}", count, noun),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriggerParams {
    #[serde(default)]
    force_update: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncrementalRequest {
    #[serde(default)]
    modified_after: Option<DateTime<Utc>>,
    #[serde(default)]
    folder_ids: Option<Vec<String>>,
    #[serde(default)]
    force_update: bool,
}

#[derive(Debug, Default, Deserialize)]
struct TypesParams {
    #[serde(default)]
    types: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchParams {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    types: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerCompareParams {
    #[serde(default = "default_config_type")]
    config_type: String,
    #[serde(default)]
    include_details: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterCompareParams {
    #[serde(default)]
    cluster_id: Option<String>,
    #[serde(default)]
    include_details: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigsCompareParams {
    #[serde(default)]
    env1: Option<String>,
    #[serde(default)]
    env2: Option<String>,
    #[serde(default)]
    config_type: Option<String>,
    #[serde(default)]
    cluster_id: Option<String>,
    #[serde(default)]
    include_details: Option<bool>,
}

fn default_config_type() -> String {
    "server".to_string()
}

/// Comma separated `types`; blank means every type.
fn parse_types(types: Option<&str>) -> Option<Vec<ArtifactKind>> {
    let kinds: Vec<ArtifactKind> = types?
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(ArtifactKind::parse)
        .collect();
    (!kinds.is_empty()).then_some(kinds)
}

fn compare_options(include_details: Option<bool>, cluster_id: Option<String>) -> ListOptions {
    let mut options = ListOptions::new();
    options.insert(
        "includeDetails".to_string(),
        include_details.unwrap_or(true).to_string(),
    );
    if let Some(cluster_id) = cluster_id {
        options.insert("clusterId".to_string(), cluster_id);
    }
    options
}

fn required(value: Option<String>, name: &str) -> ApiResult<String> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(SyncError::validation(format!("Missing required parameter '{}'", name)).into()),
    }
}

/// Query parameters of the per-type endpoints. The configured batch size
/// applies unless `batchSize` is given.
fn sync_options(state: &AppState, params: ListOptions) -> ApiResult<SyncOptions> {
    let explicit_batch = params.contains_key("batchSize");
    let mut options = SyncOptions::from_params(params)?;
    if !explicit_batch {
        options.batch_size = state.orchestrator.settings().batch_size;
    }
    Ok(options)
}

fn detach(handle: JoinHandle<bo_sync::Result<usize>>) {
    tokio::spawn(async move {
        if let Err(e) = join_run(handle).await {
            error!("Triggered synchronization failed: {}", e);
        }
    });
}

fn accepted() -> Response {
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "started",
            "message": "Synchronization started successfully",
        })),
    )
        .into_response()
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "UP" }))
}

async fn status(State(state): State<AppState>) -> Json<SyncStatus> {
    Json(state.scheduler.status())
}

async fn trigger_sync(
    State(state): State<AppState>,
    Query(params): Query<TriggerParams>,
) -> ApiResult<Response> {
    info!(force_update = params.force_update, "Triggering full synchronization");
    detach(state.scheduler.trigger_sync(params.force_update)?);
    Ok(accepted())
}

async fn trigger_incremental(
    State(state): State<AppState>,
    body: Option<Json<IncrementalRequest>>,
) -> ApiResult<Response> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    info!(
        modified_after = ?request.modified_after,
        folders = ?request.folder_ids,
        "Triggering incremental synchronization"
    );
    detach(state.scheduler.trigger_incremental(
        request.modified_after,
        request.folder_ids,
        request.force_update,
    )?);
    Ok(accepted())
}

async fn sync_reports(
    State(state): State<AppState>,
    Query(params): Query<ListOptions>,
    ids: Option<Json<Vec<String>>>,
) -> ApiResult<Json<Completed>> {
    let options = sync_options(&state, params)?;
    let ids = ids.map(|Json(ids)| ids);
    let count = state.orchestrator.sync_reports(ids, options).await?;
    Ok(Completed::new(count, "reports"))
}

async fn sync_universes(
    State(state): State<AppState>,
    Query(params): Query<ListOptions>,
    ids: Option<Json<Vec<String>>>,
) -> ApiResult<Json<Completed>> {
    let options = sync_options(&state, params)?;
    let ids = ids.map(|Json(ids)| ids);
    let count = state.orchestrator.sync_universes(ids, options).await?;
    Ok(Completed::new(count, "universes"))
}

async fn sync_connections(
    State(state): State<AppState>,
    Query(params): Query<ListOptions>,
    ids: Option<Json<Vec<String>>>,
) -> ApiResult<Json<Completed>> {
    let options = sync_options(&state, params)?;
    let ids = ids.map(|Json(ids)| ids);
    let count = state.orchestrator.sync_connections(ids, options).await?;
    Ok(Completed::new(count, "connections"))
}

async fn sync_folders(
    State(state): State<AppState>,
    Query(mut params): Query<ListOptions>,
) -> ApiResult<Json<Completed>> {
    let path = params.remove("path");
    let options = sync_options(&state, params)?;
    let count = state
        .orchestrator
        .sync_folders(path.as_deref(), options)
        .await?;
    Ok(Completed::new(count, "folders"))
}

async fn sync_dependencies(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<TypesParams>,
) -> ApiResult<Json<Completed>> {
    let types = parse_types(params.types.as_deref());
    let count = state
        .orchestrator
        .sync_universe_dependencies(&id, types.as_deref())
        .await?;
    Ok(Completed::new(count, "dependencies"))
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<Vec<ArtifactRef>>> {
    let query = params.query.unwrap_or_default();
    let types = parse_types(params.types.as_deref());
    info!(query = %query, ?types, "Searching source environment");
    let results = state
        .orchestrator
        .search(&query, types.as_deref(), None, &ListOptions::new())
        .await?;
    Ok(Json(results))
}

async fn compare_server(
    State(state): State<AppState>,
    Query(params): Query<ServerCompareParams>,
) -> ApiResult<Response> {
    let options = compare_options(params.include_details, None);
    let document = state
        .orchestrator
        .compare_server_configs(&params.config_type, &options)
        .await?;
    Ok(Json(document).into_response())
}

async fn compare_cluster(
    State(state): State<AppState>,
    Query(params): Query<ClusterCompareParams>,
) -> ApiResult<Response> {
    let options = compare_options(params.include_details, None);
    let document = state
        .orchestrator
        .compare_cluster_configs(params.cluster_id.as_deref(), &options)
        .await?;
    Ok(Json(document).into_response())
}

async fn compare_configs(
    State(state): State<AppState>,
    Query(params): Query<ConfigsCompareParams>,
) -> ApiResult<Response> {
    let env1 = required(params.env1, "env1")?;
    let env2 = required(params.env2, "env2")?;
    let config_type = required(params.config_type, "configType")?;
    let options = compare_options(params.include_details, params.cluster_id);
    let document = state
        .orchestrator
        .compare_configs(&env1, &env2, &config_type, &options)
        .await?;
    Ok(Json(document).into_response())
}
