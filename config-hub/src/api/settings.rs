//! `settings.json` as a whole document or one dotted path at a time.

use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use config_hub_core::settings;

use super::{required, ApiResult, AppState};

#[derive(Deserialize)]
struct PatchRequest {
    path: Option<String>,
    #[serde(default)]
    value: Value,
}

#[derive(Serialize)]
struct SavedResponse {
    success: bool,
}

#[derive(Serialize)]
struct PatchedResponse {
    success: bool,
    settings: Value,
}

pub(super) fn routes() -> Router<AppState> {
    Router::new().route(
        "/api/settings",
        get(get_settings).put(put_settings).patch(patch_settings),
    )
}

async fn get_settings(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    Ok(Json(settings::read_settings(&state.store).await?))
}

async fn put_settings(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> ApiResult<Json<SavedResponse>> {
    settings::write_settings(&state.store, &body).await?;
    Ok(Json(SavedResponse { success: true }))
}

async fn patch_settings(
    State(state): State<AppState>,
    Json(req): Json<PatchRequest>,
) -> ApiResult<Json<PatchedResponse>> {
    let path = required(req.path, "path")?;
    let updated = settings::patch_settings(&state.store, &path, req.value).await?;
    Ok(Json(PatchedResponse {
        success: true,
        settings: updated,
    }))
}
