use axum::{extract::State, http::HeaderMap, response::Response, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{begin_request, finish, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct SessionBody {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_connections: Option<usize>,
}

/// POST /api/clear-history
pub async fn clear_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<SessionBody>>,
) -> Response {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let session_id = begin_request(&state, &headers, body.session_id.as_deref()).await;
    state.sessions().clear_history(&session_id);
    info!("Cleared history for session {}", session_id);
    finish(
        "clear_history",
        &session_id,
        Json(SessionResponse {
            success: true,
            closed_connections: None,
        }),
    )
}

/// POST /api/close-connections
pub async fn close_connections(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<SessionBody>>,
) -> Response {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let session_id = begin_request(&state, &headers, body.session_id.as_deref()).await;
    let closed = state.sessions().release_session(&session_id).await;
    finish(
        "close_connections",
        &session_id,
        Json(SessionResponse {
            success: true,
            closed_connections: Some(closed),
        }),
    )
}
