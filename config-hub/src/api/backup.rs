//! Configuration backup download, restore upload and cleanup.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use config_hub_core::archive::{self, RestoreMode, RestoreReport};

use super::{ApiError, ApiResult, AppState};

/// Upper bound on an uploaded archive.
const MAX_UPLOAD: usize = 50 * 1024 * 1024;

#[derive(Deserialize)]
struct RestoreParams {
    #[serde(default)]
    mode: RestoreMode,
}

#[derive(Serialize)]
struct PruneResponse {
    success: bool,
    deleted: usize,
}

pub(super) fn routes() -> Router<AppState> {
    Router::new().route(
        "/api/backup",
        get(download)
            .post(upload)
            .delete(prune)
            .layer(DefaultBodyLimit::max(MAX_UPLOAD)),
    )
}

async fn download(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let archive = archive::export(&state.store).await?;
    let headers = [
        (header::CONTENT_TYPE, "application/gzip".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", archive.filename),
        ),
    ];
    Ok((headers, archive.bytes))
}

async fn upload(
    State(state): State<AppState>,
    Query(params): Query<RestoreParams>,
    body: Bytes,
) -> ApiResult<Json<RestoreReport>> {
    if body.is_empty() {
        return Err(ApiError::bad_request("no backup file provided"));
    }
    let report = archive::restore(&state.store, body.to_vec(), params.mode).await?;
    Ok(Json(report))
}

async fn prune(State(state): State<AppState>) -> ApiResult<Json<PruneResponse>> {
    let deleted = archive::prune_pre_restore_backups(&state.store).await?;
    Ok(Json(PruneResponse {
        success: true,
        deleted,
    }))
}

#[cfg(test)]
mod tests {
    use super::super::tests::{json_body, test_app};
    use axum::{
        body::{self, Body},
        http::{header, Request, StatusCode},
    };
    use tower::util::ServiceExt;

    #[tokio::test]
    async fn empty_root_has_nothing_to_download() {
        let (_dir, _store, app) = test_app();
        let req = Request::builder().uri("/api/backup").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn download_then_replace_restore() {
        let (_dir, store, app) = test_app();
        store.write("CLAUDE.md", "# original", false).await.unwrap();
        store.write("rules/a.md", "a", false).await.unwrap();

        let req = Request::builder().uri("/api/backup").body(Body::empty()).unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/gzip");
        let disposition = resp.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
        assert!(disposition.contains("claude-config-backup-"));
        let archive = body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();

        store.write("CLAUDE.md", "# changed", false).await.unwrap();

        let req = Request::builder()
            .method("POST")
            .uri("/api/backup?mode=replace")
            .header("content-type", "application/gzip")
            .body(Body::from(archive))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let v = json_body(resp).await;
        assert_eq!(v["mode"], "replace");
        assert_eq!(v["restoredItems"], serde_json::json!(["CLAUDE.md", "rules"]));
        assert_eq!(v["backupInfo"]["version"], "1.0");
        assert_eq!(store.read("CLAUDE.md").await.unwrap(), "# original");

        let req = Request::builder()
            .method("DELETE")
            .uri("/api/backup")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let v = json_body(resp).await;
        assert_eq!(v["deleted"], 1);
    }

    #[tokio::test]
    async fn bad_uploads_are_rejected() {
        let (_dir, _store, app) = test_app();
        let req = Request::builder()
            .method("POST")
            .uri("/api/backup")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = Request::builder()
            .method("POST")
            .uri("/api/backup?mode=merge")
            .body(Body::from("definitely not gzip"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
