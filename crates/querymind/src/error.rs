//! Typed failures surfaced by the query pipeline.
//!
//! Driver and backend faults have their own enums so the layers that own them
//! can match on transport details; everything the caller sees is folded into
//! [`QueryError`].

use crate::synth::safety::DestructiveOperation;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("failed to connect to {host}:{port}: {message}")]
    Connect {
        host: String,
        port: u16,
        message: String,
    },
    #[error("statement failed: {0}")]
    Statement(String),
    #[error("transaction control failed: {0}")]
    Transaction(String),
    #[error("connection is closed")]
    Closed,
}

impl DbError {
    pub fn statement(err: impl std::fmt::Display) -> Self {
        DbError::Statement(err.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("invalid generation backend configuration: {0}")]
    InvalidConfig(String),
    #[error("generation request failed: {0}")]
    Transport(String),
    #[error("generation backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("generation timed out after {0}s")]
    Timeout(u64),
    #[error("malformed generation response: {0}")]
    Malformed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("no live database connection; connect to a database first")]
    ConnectionRequired,

    #[error("could not read the database structure: {0}")]
    SchemaUnavailable(String),

    #[error("no database selected on this connection")]
    NoDatabaseSelected,

    #[error("query generation failed: {0}")]
    GenerationBackend(#[from] BackendError),

    #[error("the question is ambiguous:{0}")]
    AmbiguousQuery(String),

    #[error("the model did not produce a usable query")]
    EmptyGeneration,

    #[error("refusing to run a destructive statement ({0})")]
    UnsafeOperation(DestructiveOperation),

    #[error("query execution failed: {0}")]
    Execution(String),

    #[error("could not obtain a database connection: {0}")]
    Pool(String),
}

impl QueryError {
    /// Stable identifier used for metrics labels and HTTP status mapping.
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::ConnectionRequired => "connection_required",
            QueryError::SchemaUnavailable(_) => "schema_unavailable",
            QueryError::NoDatabaseSelected => "no_database_selected",
            QueryError::GenerationBackend(_) => "generation_backend_error",
            QueryError::AmbiguousQuery(_) => "ambiguous_query",
            QueryError::EmptyGeneration => "empty_generation",
            QueryError::UnsafeOperation(_) => "unsafe_operation",
            QueryError::Execution(_) => "execution_error",
            QueryError::Pool(_) => "pool_error",
        }
    }

    /// True when the fault lies with the question or the generated text rather
    /// than with infrastructure.
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            QueryError::ConnectionRequired
                | QueryError::NoDatabaseSelected
                | QueryError::AmbiguousQuery(_)
                | QueryError::EmptyGeneration
                | QueryError::UnsafeOperation(_)
        )
    }
}
