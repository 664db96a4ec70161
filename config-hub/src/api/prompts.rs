//! Markdown prompts under `<root>/prompts`.

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use config_hub_core::layout::{MARKDOWN_EXTENSION, PROMPTS_DIR};
use config_hub_core::storage::format_bytes;
use config_hub_core::store::{BackupOutcome, WriteOptions};

use super::folder::{entry_path, list_folder};
use super::{required, ApiError, ApiResult, AppState};

#[derive(Deserialize)]
struct PromptQuery {
    filename: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PromptSummary {
    name: String,
    path: String,
    size: String,
    last_modified: DateTime<Utc>,
}

#[derive(Serialize)]
struct PromptDetail {
    name: String,
    path: String,
    content: String,
}

#[derive(Deserialize)]
struct SavePromptRequest {
    filename: Option<String>,
    content: Option<String>,
}

#[derive(Serialize)]
struct SavePromptResponse {
    success: bool,
    filename: String,
    backup: Option<String>,
}

pub(super) fn routes() -> Router<AppState> {
    Router::new().route("/api/prompts", get(get_prompts).put(save_prompt))
}

async fn get_prompts(
    State(state): State<AppState>,
    Query(query): Query<PromptQuery>,
) -> ApiResult<Response> {
    match query.filename.filter(|f| !f.is_empty()) {
        Some(name) => {
            let path = state.store.resolve(entry_path(PROMPTS_DIR, &name)?)?;
            let content = state.store.read(&path).await?;
            let detail = PromptDetail {
                name,
                path: path.display().to_string(),
                content,
            };
            Ok(Json(detail).into_response())
        }
        None => {
            let entries = list_folder(&state.store, PROMPTS_DIR, MARKDOWN_EXTENSION).await?;
            let prompts: Vec<PromptSummary> = entries
                .into_iter()
                .map(|entry| PromptSummary {
                    name: entry.name,
                    path: entry.path.display().to_string(),
                    size: format_bytes(entry.stats.size),
                    last_modified: entry.stats.modified,
                })
                .collect();
            Ok(Json(prompts).into_response())
        }
    }
}

async fn save_prompt(
    State(state): State<AppState>,
    Json(req): Json<SavePromptRequest>,
) -> ApiResult<Json<SavePromptResponse>> {
    let filename = required(req.filename, "filename")?;
    let content = req
        .content
        .ok_or_else(|| ApiError::bad_request("content is required"))?;
    let path = state.store.resolve(entry_path(PROMPTS_DIR, &filename)?)?;

    let outcome = state
        .store
        .write_with(&path, &content, WriteOptions::default())
        .await?;
    let backup = match outcome {
        BackupOutcome::Created(p) => Some(p.display().to_string()),
        BackupOutcome::Skipped(_) => None,
    };
    Ok(Json(SavePromptResponse {
        success: true,
        filename,
        backup,
    }))
}
