//! HTTP surface: maps requests onto pipeline and session entry points.

pub mod connection_api;
pub mod query_api;
pub mod session_api;
pub mod stream_api;

use std::sync::Arc;

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::db::{ConnectionConfig, Connector};
use crate::error::QueryError;
use crate::llm::GenerationBackend;
use crate::metrics;
use crate::pipeline::QueryPipeline;
use crate::schema::inspector::SchemaInspector;
use crate::session::SessionStore;

pub use connection_api::{db_structure, test_connection, test_llm_connection};
pub use query_api::{direct_sql, nl_query};
pub use session_api::{clear_history, close_connections};
pub use stream_api::stream_query;

pub const SESSION_HEADER: &str = "x-session-id";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<QueryPipeline>,
    pub connector: Arc<dyn Connector>,
    pub backend: Arc<dyn GenerationBackend>,
    pub inspector: SchemaInspector,
}

impl AppState {
    pub fn sessions(&self) -> &Arc<SessionStore> {
        self.pipeline.sessions()
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub kind: &'static str,
}

#[derive(Debug)]
pub enum ApiError {
    Invalid(String),
    Query(QueryError),
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        ApiError::Query(err)
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        ApiError::Invalid(errors.to_string())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Invalid(_) => StatusCode::BAD_REQUEST,
            ApiError::Query(err) => match err {
                QueryError::ConnectionRequired
                | QueryError::NoDatabaseSelected
                | QueryError::Execution(_) => StatusCode::BAD_REQUEST,
                QueryError::AmbiguousQuery(_) | QueryError::EmptyGeneration => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                QueryError::UnsafeOperation(_) => StatusCode::FORBIDDEN,
                QueryError::GenerationBackend(_) => StatusCode::BAD_GATEWAY,
                QueryError::Pool(_) => StatusCode::SERVICE_UNAVAILABLE,
                QueryError::SchemaUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Invalid(_) => "invalid_request",
            ApiError::Query(err) => err.kind(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        if let ApiError::Query(_) = &self {
            metrics::inc_failure(kind);
        }
        let error = match self {
            ApiError::Invalid(msg) => msg,
            ApiError::Query(err) => err.to_string(),
        };
        if status.is_server_error() {
            warn!("Request failed ({}): {}", kind, error);
        } else {
            debug!("Request rejected ({}): {}", kind, error);
        }
        (
            status,
            Json(ErrorResponse {
                success: false,
                error,
                kind,
            }),
        )
            .into_response()
    }
}

pub(crate) fn validate<T: Validate>(body: &T) -> Result<(), ApiError> {
    body.validate().map_err(ApiError::from)
}

pub(crate) fn validate_connection(config: &ConnectionConfig) -> Result<(), ValidationError> {
    if config.host.trim().is_empty() {
        return Err(ValidationError::new("host_required"));
    }
    if config.username.trim().is_empty() {
        return Err(ValidationError::new("username_required"));
    }
    if config.port == 0 {
        return Err(ValidationError::new("port_out_of_range"));
    }
    Ok(())
}

/// Session id from the body, then the header, else a fresh one.
pub(crate) fn resolve_session(headers: &HeaderMap, requested: Option<&str>) -> String {
    requested
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .or_else(|| {
            headers
                .get(SESSION_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Per-request bookkeeping: mark the session as seen and give the sweep a
/// chance to run.
pub(crate) async fn begin_request(state: &AppState, headers: &HeaderMap, requested: Option<&str>) -> String {
    let session_id = resolve_session(headers, requested);
    let sessions = state.sessions();
    sessions.touch(&session_id);

    let reclaimed = sessions.maybe_sweep().await;
    if !reclaimed.is_empty() {
        debug!("Reclaimed idle sessions: {:?}", reclaimed);
    }
    let pool = sessions.pool();
    metrics::set_pool_size(pool.session_ids().await.len(), pool.connection_count().await);
    session_id
}

/// Attach the session header and count the response.
pub(crate) fn finish(route: &str, session_id: &str, result: impl IntoResponse) -> Response {
    let mut response = result.into_response();
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    metrics::inc_request(route, response.status().as_str());
    response
}
