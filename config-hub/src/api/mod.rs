//! HTTP API over the configuration root.

mod backup;
mod error;
mod folder;
mod hooks;
mod prompts;
mod settings;
mod watch;

pub use error::{ApiError, ApiResult};

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use config_hub_core::storage::{self, ConfigStats, StorageStats};
use config_hub_core::store::ConfinedStore;
use config_hub_core::watch::ChangeStream;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ConfinedStore>,
    pub changes: Arc<ChangeStream>,
}

#[derive(Deserialize)]
struct FileQuery {
    path: Option<String>,
}

#[derive(Serialize)]
struct FileResponse {
    content: String,
    path: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriteRequest {
    path: Option<String>,
    content: Option<String>,
    #[serde(default = "default_backup")]
    create_backup: bool,
}

fn default_backup() -> bool {
    true
}

#[derive(Deserialize)]
struct DeleteRequest {
    path: Option<String>,
    #[serde(default)]
    confirmed: bool,
}

#[derive(Serialize)]
struct SuccessResponse {
    success: bool,
    path: String,
}

pub fn router(store: Arc<ConfinedStore>, changes: Arc<ChangeStream>) -> Router {
    let app_state = AppState { store, changes };
    Router::new()
        .route(
            "/api/files",
            get(read_file).put(write_file).delete(delete_file),
        )
        .route("/api/storage", get(storage_stats))
        .route("/api/stats", get(config_stats))
        .merge(hooks::routes())
        .merge(prompts::routes())
        .merge(settings::routes())
        .merge(backup::routes())
        .merge(watch::routes())
        .with_state(app_state)
}

fn required(value: Option<String>, name: &str) -> ApiResult<String> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("{} is required", name)))
}

async fn read_file(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> ApiResult<Json<FileResponse>> {
    let path = state.store.resolve(required(query.path, "path")?)?;
    let content = state.store.read(&path).await?;
    Ok(Json(FileResponse {
        content,
        path: path.display().to_string(),
    }))
}

async fn write_file(
    State(state): State<AppState>,
    Json(req): Json<WriteRequest>,
) -> ApiResult<Json<SuccessResponse>> {
    let path = state.store.resolve(required(req.path, "path")?)?;
    let content = req
        .content
        .ok_or_else(|| ApiError::bad_request("content is required"))?;
    state.store.write(&path, &content, req.create_backup).await?;
    Ok(Json(SuccessResponse {
        success: true,
        path: path.display().to_string(),
    }))
}

async fn delete_file(
    State(state): State<AppState>,
    Json(req): Json<DeleteRequest>,
) -> ApiResult<Json<SuccessResponse>> {
    let path = state.store.resolve(required(req.path, "path")?)?;
    state.store.delete(&path, req.confirmed).await?;
    Ok(Json(SuccessResponse {
        success: true,
        path: path.display().to_string(),
    }))
}

async fn storage_stats(State(state): State<AppState>) -> ApiResult<Json<StorageStats>> {
    Ok(Json(storage::storage_stats(&state.store).await?))
}

async fn config_stats(State(state): State<AppState>) -> ApiResult<Json<ConfigStats>> {
    Ok(Json(storage::config_stats(&state.store).await?))
}
