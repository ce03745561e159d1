// querymind/crates/querymind/src/lib.rs

pub mod config;
pub mod db;
pub mod error;
pub mod history;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod schema;
pub mod session;
pub mod synth;
pub mod telemetry;
pub mod utils;

#[cfg(feature = "cli")]
pub mod api;
#[cfg(feature = "cli")]
pub mod metrics;
#[cfg(feature = "cli")]
pub mod server;

#[cfg(test)]
pub(crate) mod test_support;

// Public API exports
pub use config::{Config, GenerationConfig};
pub use db::{ConnectionConfig, ConnectionPool, Connector, DbSession, MySqlConnector};
pub use error::{BackendError, DbError, QueryError};
pub use history::{ConversationHistory, ConversationTurn};
pub use llm::{create_backend, GenerationBackend, OpenAiBackend};
pub use pipeline::{QueryAnswer, QueryPipeline, QueryRequest, StagedEvent, StreamOutcome};
pub use schema::{SchemaDescription, SchemaSnapshot};
pub use session::SessionStore;
pub use synth::{QuerySynthesizer, SynthesizedQuery};

#[cfg(feature = "cli")]
pub use server::run_server;
