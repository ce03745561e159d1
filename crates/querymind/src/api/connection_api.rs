//! Connection probing, schema description and backend health.

use std::time::{Duration, Instant};

use axum::{extract::State, http::HeaderMap, response::Response, Json};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

use super::{begin_request, finish, validate, validate_connection, ApiError, AppState};
use crate::db::ConnectionConfig;
use crate::error::QueryError;
use crate::llm::CompletionRequest;
use crate::schema::SchemaDescription;

const LLM_PROBE_PROMPT: &str = "Reply with the single word OK.";
const LLM_PROBE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize, Validate)]
pub struct ConnectionBody {
    #[serde(default)]
    #[validate(length(max = 128))]
    pub session_id: Option<String>,
    #[serde(flatten)]
    #[validate(custom = "validate_connection")]
    pub config: ConnectionConfig,
}

#[derive(Debug, Serialize)]
pub struct TestConnectionResponse {
    pub success: bool,
    pub databases: Vec<String>,
}

/// POST /api/test-connection: connect without pooling and list databases.
pub async fn test_connection(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ConnectionBody>,
) -> Response {
    let session_id = begin_request(&state, &headers, body.session_id.as_deref()).await;
    let result = probe_database(&state, body).await;
    finish("test_connection", &session_id, result)
}

async fn probe_database(state: &AppState, body: ConnectionBody) -> Result<Json<TestConnectionResponse>, ApiError> {
    validate(&body)?;
    let mut session = state
        .connector
        .connect(&body.config)
        .await
        .map_err(|e| QueryError::Pool(e.to_string()))?;

    let listed = state.inspector.databases(session.as_mut()).await;
    if let Err(e) = session.close().await {
        warn!("Closing probe connection failed: {}", e);
    }

    let databases = listed.map_err(|e| QueryError::Execution(e.to_string()))?;
    info!("Connection test to {} found {} database(s)", body.config.host, databases.len());
    Ok(Json(TestConnectionResponse {
        success: true,
        databases,
    }))
}

#[derive(Debug, Serialize)]
pub struct DbStructureResponse {
    pub success: bool,
    pub db_structure: SchemaDescription,
}

/// POST /api/db-structure: rich snapshot, reduced dump as fallback.
pub async fn db_structure(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ConnectionBody>,
) -> Response {
    let session_id = begin_request(&state, &headers, body.session_id.as_deref()).await;
    let result = describe(&state, &session_id, body).await;
    finish("db_structure", &session_id, result)
}

async fn describe(state: &AppState, session_id: &str, body: ConnectionBody) -> Result<Json<DbStructureResponse>, ApiError> {
    validate(&body)?;
    let conn = state.sessions().acquire(session_id, &body.config).await?;
    let mut lease = conn.lease().await.map_err(|_| QueryError::ConnectionRequired)?;
    let description = state.inspector.describe(lease.session()).await?;
    Ok(Json(DbStructureResponse {
        success: true,
        db_structure: description,
    }))
}

#[derive(Debug, Serialize)]
pub struct LlmProbeResponse {
    pub success: bool,
    pub model: String,
    pub message: String,
    pub latency_ms: u128,
}

/// GET /api/test-llm-connection
pub async fn test_llm_connection(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session_id = begin_request(&state, &headers, None).await;
    let request = CompletionRequest::new(LLM_PROBE_PROMPT, 0.0)
        .with_max_tokens(5)
        .with_timeout(LLM_PROBE_TIMEOUT);

    let started = Instant::now();
    let result = match state.backend.complete(request).await {
        Ok(reply) => Ok(Json(LlmProbeResponse {
            success: true,
            model: state.backend.model().to_string(),
            message: reply.trim().to_string(),
            latency_ms: started.elapsed().as_millis(),
        })),
        Err(e) => Err(ApiError::Query(QueryError::GenerationBackend(e))),
    };
    finish("test_llm_connection", &session_id, result)
}
