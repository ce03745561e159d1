use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::db::{DbSession, Execution, NormalizedRow};
use crate::error::QueryError;

/// What a statement produced, with scalars already normalized.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryOutcome {
    Rows(Vec<NormalizedRow>),
    Affected { rows_affected: u64 },
}

impl QueryOutcome {
    /// Rows as sent to callers; a statement becomes one status row.
    pub fn into_rows(self) -> Vec<NormalizedRow> {
        match self {
            QueryOutcome::Rows(rows) => rows,
            QueryOutcome::Affected { rows_affected } => {
                let mut row = NormalizedRow::new();
                row.insert("status".into(), Value::from("success"));
                row.insert("rows_affected".into(), json!(rows_affected));
                vec![row]
            }
        }
    }

    pub fn row_count(&self) -> usize {
        match self {
            QueryOutcome::Rows(rows) => rows.len(),
            QueryOutcome::Affected { .. } => 1,
        }
    }
}

/// Run one statement and settle its transaction. Successful statements are
/// committed, failed ones rolled back, so the session never leaves here with
/// an open transaction.
pub async fn execute_query(session: &mut dyn DbSession, sql: &str) -> Result<QueryOutcome, QueryError> {
    let outcome = match session.execute(sql).await {
        Ok(Execution::Rows(rs)) => QueryOutcome::Rows(rs.normalized()),
        Ok(Execution::Affected { rows_affected }) => QueryOutcome::Affected { rows_affected },
        Err(e) => {
            rollback_quietly(session).await;
            return Err(QueryError::Execution(e.to_string()));
        }
    };

    if let Err(e) = session.commit().await {
        rollback_quietly(session).await;
        return Err(QueryError::Execution(e.to_string()));
    }

    debug!("Statement settled with {} row(s)", outcome.row_count());
    Ok(outcome)
}

pub async fn rollback_quietly(session: &mut dyn DbSession) {
    if let Err(e) = session.rollback().await {
        warn!("Rollback failed: {}", e);
    }
}
