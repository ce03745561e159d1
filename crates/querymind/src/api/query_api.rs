//! Synchronous question answering and direct SQL execution.

use std::time::Instant;

use axum::{extract::State, http::HeaderMap, response::Response, Json};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

use super::{begin_request, finish, validate, validate_connection, ApiError, AppState};
use crate::db::{ConnectionConfig, NormalizedRow};
use crate::error::QueryError;
use crate::pipeline::{execute_query, QueryAnswer, QueryRequest};
use crate::synth::ComplexityProfile;
use crate::utils::TextUtils;

pub const DIRECT_SQL_ANSWER: &str = "SQL executed directly.";

#[derive(Debug, Deserialize, Validate)]
pub struct QueryBody {
    #[serde(default)]
    #[validate(length(max = 128))]
    pub session_id: Option<String>,
    #[validate(length(min = 1, max = 4000))]
    pub question: String,
    #[validate(custom = "validate_connection")]
    pub config: ConnectionConfig,
}

impl QueryBody {
    pub(crate) fn into_request(self, session_id: String) -> QueryRequest {
        QueryRequest {
            session_id,
            question: self.question,
            config: self.config,
        }
    }
}

/// POST /api/nl-query
pub async fn nl_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<QueryBody>,
) -> Response {
    let session_id = begin_request(&state, &headers, body.session_id.as_deref()).await;
    info!(
        "NL query for session {}: {}",
        session_id,
        TextUtils::truncate_with_ellipsis(&body.question, 120)
    );

    let result = answer(&state, body, session_id.clone()).await;
    finish("nl_query", &session_id, result)
}

async fn answer(state: &AppState, body: QueryBody, session_id: String) -> Result<Json<QueryAnswer>, ApiError> {
    validate(&body)?;
    let request = body.into_request(session_id);
    Ok(Json(state.pipeline.run(&request).await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct DirectSqlBody {
    #[serde(default)]
    #[validate(length(max = 128))]
    pub session_id: Option<String>,
    #[validate(length(min = 1))]
    pub sql: String,
    #[validate(custom = "validate_connection")]
    pub config: ConnectionConfig,
}

#[derive(Debug, Serialize)]
pub struct DirectSqlResponse {
    pub sql: String,
    pub results: Vec<NormalizedRow>,
    pub answer: &'static str,
    pub execution_time_ms: u128,
    pub complexity: ComplexityProfile,
}

/// True if `sql` holds more than one statement. Lexical, like the rest of
/// the gatekeeping: a `;` inside a literal counts too.
pub fn has_multiple_statements(sql: &str) -> bool {
    let trimmed = sql.trim();
    let body = trimmed.strip_suffix(';').unwrap_or(trimmed);
    body.contains(';')
}

/// POST /api/direct-sql: run caller-supplied SQL on a fresh, unpooled connection.
pub async fn direct_sql(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<DirectSqlBody>,
) -> Response {
    let session_id = begin_request(&state, &headers, body.session_id.as_deref()).await;
    let result = run_direct(&state, body).await;
    finish("direct_sql", &session_id, result)
}

async fn run_direct(state: &AppState, body: DirectSqlBody) -> Result<Json<DirectSqlResponse>, ApiError> {
    validate(&body)?;
    if has_multiple_statements(&body.sql) {
        warn!("Rejected multi-statement direct SQL");
        return Err(ApiError::Invalid("executing multiple SQL statements is not supported".into()));
    }

    let mut session = state
        .connector
        .connect(&body.config)
        .await
        .map_err(|e| QueryError::Pool(e.to_string()))?;

    let sql = body.sql.trim().to_string();
    let started = Instant::now();
    let outcome = execute_query(session.as_mut(), &sql).await;
    let elapsed = started.elapsed();

    if let Err(e) = session.close().await {
        warn!("Closing direct SQL connection failed: {}", e);
    }

    let results = outcome?.into_rows();
    info!("Direct SQL returned {} row(s) in {:?}", results.len(), elapsed);
    Ok(Json(DirectSqlResponse {
        complexity: ComplexityProfile::of(&sql),
        sql,
        results,
        answer: DIRECT_SQL_ANSWER,
        execution_time_ms: elapsed.as_millis(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiple_statements_detected() {
        assert!(!has_multiple_statements("SELECT 1;"));
        assert!(!has_multiple_statements("  SELECT 1  "));
        assert!(has_multiple_statements("SELECT 1; DROP TABLE t"));
        assert!(has_multiple_statements("SELECT 1;;"));
    }

    #[test]
    fn test_query_body_validation() {
        let body: QueryBody = serde_json::from_value(serde_json::json!({
            "question": "",
            "config": {"host": "db", "username": "app"}
        }))
        .unwrap();
        assert!(body.validate().is_err());
        assert_eq!(body.config.port, 3306);
    }
}
