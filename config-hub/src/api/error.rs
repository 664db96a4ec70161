use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use config_hub_core::archive::ArchiveError;
use config_hub_core::settings::SettingsError;
use config_hub_core::store::StoreError;
use serde_json::json;
use tracing::error;

/// Error returned by handlers. Rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(e) => store_status(e),
            ApiError::Archive(ArchiveError::NothingToBackup) => StatusCode::NOT_FOUND,
            ApiError::Archive(ArchiveError::InvalidArchive(_)) => StatusCode::BAD_REQUEST,
            ApiError::Archive(ArchiveError::Store(e)) => store_status(e),
            ApiError::Archive(ArchiveError::Io(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Settings(SettingsError::Store(e)) => store_status(e),
            ApiError::Settings(SettingsError::Malformed(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Settings(_) => StatusCode::BAD_REQUEST,
        }
    }
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::OutOfScope { .. } => StatusCode::FORBIDDEN,
        StoreError::NotConfirmed(_) => StatusCode::BAD_REQUEST,
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
