//! Server-sent change notifications.

use axum::{
    extract::State,
    http::{header, HeaderName},
    response::{
        sse::{self, Sse},
        IntoResponse,
    },
    routing::get,
    Router,
};
use futures::StreamExt;

use super::AppState;

pub const CONNECTION_ID_HEADER: HeaderName = HeaderName::from_static("x-connection-id");

pub(super) fn routes() -> Router<AppState> {
    Router::new().route("/api/watch", get(watch))
}

/// Each request opens its own subscription; the connection and its OS
/// watches are released when the client goes away and the body is dropped.
async fn watch(State(state): State<AppState>) -> impl IntoResponse {
    let subscription = state.changes.subscribe();
    let id = subscription.id();
    let stream = subscription.map(|event| sse::Event::default().json_data(event));
    let headers = [
        (CONNECTION_ID_HEADER, id.to_string()),
        (header::CACHE_CONTROL, "no-cache".to_string()),
    ];
    (headers, Sse::new(stream))
}
