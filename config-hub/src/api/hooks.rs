//! Shell hooks under `<root>/hooks`.

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use config_hub_core::layout::{HOOKS_DIR, HOOK_EXTENSION};
use config_hub_core::metrics::{self, HookMetricsReport, MetricsQuery, DEFAULT_METRICS_LIMIT};
use config_hub_core::storage::format_bytes;
use config_hub_core::store::{BackupOutcome, WriteOptions};

use super::folder::{entry_path, list_folder};
use super::{ApiError, ApiResult, AppState};

#[derive(Deserialize)]
struct HookQuery {
    name: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HookSummary {
    name: String,
    path: String,
    size: String,
    last_modified: DateTime<Utc>,
    /// Executable bit set.
    enabled: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HookDetail {
    name: String,
    path: String,
    content: String,
    size: String,
    last_modified: DateTime<Utc>,
}

#[derive(Deserialize)]
struct MetricsParams {
    hook: Option<String>,
    /// Zero or negative returns every entry.
    limit: Option<i64>,
}

#[derive(Deserialize)]
struct SaveHookRequest {
    name: Option<String>,
    content: Option<String>,
}

#[derive(Serialize)]
struct SaveHookResponse {
    success: bool,
    path: String,
    backup: Option<String>,
}

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/hooks", get(get_hooks).put(save_hook))
        .route("/api/hooks/metrics", get(hook_metrics))
}

async fn get_hooks(
    State(state): State<AppState>,
    Query(query): Query<HookQuery>,
) -> ApiResult<Response> {
    match query.name {
        Some(name) => Ok(Json(read_hook(&state, &name).await?).into_response()),
        None => Ok(Json(list_hooks(&state).await?).into_response()),
    }
}

async fn read_hook(state: &AppState, name: &str) -> ApiResult<HookDetail> {
    let path = state.store.resolve(entry_path(HOOKS_DIR, name)?)?;
    let content = state.store.read(&path).await?;
    let stats = state.store.file_stats(&path).await?;
    Ok(HookDetail {
        name: name.to_string(),
        path: path.display().to_string(),
        content,
        size: format_bytes(stats.size),
        last_modified: stats.modified,
    })
}

async fn list_hooks(state: &AppState) -> ApiResult<Vec<HookSummary>> {
    let entries = list_folder(&state.store, HOOKS_DIR, HOOK_EXTENSION).await?;
    Ok(entries
        .into_iter()
        .map(|entry| HookSummary {
            name: entry.name,
            path: entry.path.display().to_string(),
            size: format_bytes(entry.stats.size),
            last_modified: entry.stats.modified,
            enabled: entry.stats.executable,
        })
        .collect())
}

async fn hook_metrics(
    State(state): State<AppState>,
    Query(params): Query<MetricsParams>,
) -> ApiResult<Json<HookMetricsReport>> {
    let limit = match params.limit {
        None => Some(DEFAULT_METRICS_LIMIT),
        Some(n) if n > 0 => Some(n as usize),
        Some(_) => None,
    };
    let query = MetricsQuery {
        hook: params.hook.filter(|h| !h.is_empty()),
        limit,
    };
    Ok(Json(metrics::hook_metrics(&state.store, &query).await?))
}

async fn save_hook(
    State(state): State<AppState>,
    Json(req): Json<SaveHookRequest>,
) -> ApiResult<Json<SaveHookResponse>> {
    let name = req
        .name
        .ok_or_else(|| ApiError::bad_request("name is required"))?;
    let content = req
        .content
        .ok_or_else(|| ApiError::bad_request("content is required"))?;
    let path = state.store.resolve(entry_path(HOOKS_DIR, &name)?)?;

    let outcome = state
        .store
        .write_with(
            &path,
            &content,
            WriteOptions {
                backup: true,
                executable: true,
            },
        )
        .await?;
    let backup = match outcome {
        BackupOutcome::Created(p) => Some(p.display().to_string()),
        BackupOutcome::Skipped(_) => None,
    };
    Ok(Json(SaveHookResponse {
        success: true,
        path: path.display().to_string(),
        backup,
    }))
}
