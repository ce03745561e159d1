//! Streaming question answering as newline-delimited JSON.
//!
//! Each line is one staged event (`{"type": ..., "data": ...}`). The typed
//! fault of a failed run is counted and logged once the stream has closed.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::Response,
    Json,
};
use futures_util::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use super::query_api::QueryBody;
use super::{begin_request, finish, validate, AppState};
use crate::metrics;
use crate::pipeline::{StagedRun, StreamOutcome};
use crate::utils::TextUtils;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// POST /api/stream-query
pub async fn stream_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<QueryBody>,
) -> Response {
    let session_id = begin_request(&state, &headers, body.session_id.as_deref()).await;
    if let Err(e) = validate(&body) {
        return finish("stream_query", &session_id, e);
    }
    info!(
        "Stream query for session {}: {}",
        session_id,
        TextUtils::truncate_with_ellipsis(&body.question, 120)
    );

    let StagedRun { events, outcome } = state.pipeline.stream(body.into_request(session_id.clone()));

    let sid = session_id.clone();
    tokio::spawn(async move {
        match outcome.await {
            Ok(Ok(StreamOutcome::Completed)) => debug!("Stream for session {} finished", sid),
            Ok(Ok(StreamOutcome::Disconnected)) => info!("Stream for session {} abandoned by client", sid),
            Ok(Err(err)) => {
                metrics::inc_failure(err.kind());
                warn!("Stream for session {} ended with {}: {}", sid, err.kind(), err);
            }
            Err(join_error) => warn!("Stream task for session {} aborted: {}", sid, join_error),
        }
    });

    let lines = ReceiverStream::new(events).map(|event| event.to_ndjson());
    let response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)],
        Body::from_stream(lines),
    );
    finish("stream_query", &session_id, response)
}
