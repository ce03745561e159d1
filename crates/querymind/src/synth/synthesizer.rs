use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::SynthesizedQuery;
use crate::db::PooledConnection;
use crate::error::QueryError;
use crate::history::ConversationHistory;
use crate::llm::{CompletionRequest, GenerationBackend};
use crate::prompt::build_sql_prompt;
use crate::schema::inspector::SchemaInspector;
use crate::utils::TextUtils;

/// Generation parameters for SQL synthesis.
#[derive(Debug, Clone)]
pub struct SynthesisSettings {
    pub temperature: f32,
    pub timeout: Duration,
    pub stop: Vec<String>,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            temperature: 0.5,
            timeout: Duration::from_secs(45),
            stop: vec!["```".to_string()],
        }
    }
}

pub struct QuerySynthesizer {
    backend: Arc<dyn GenerationBackend>,
    inspector: SchemaInspector,
    settings: SynthesisSettings,
}

impl QuerySynthesizer {
    pub fn new(backend: Arc<dyn GenerationBackend>, settings: SynthesisSettings) -> Self {
        Self {
            backend,
            inspector: SchemaInspector::default(),
            settings,
        }
    }

    pub fn with_inspector(mut self, inspector: SchemaInspector) -> Self {
        self.inspector = inspector;
        self
    }

    pub fn backend(&self) -> &Arc<dyn GenerationBackend> {
        &self.backend
    }

    pub fn inspector(&self) -> &SchemaInspector {
        &self.inspector
    }

    /// Produce a vetted query for `question`. The connection is only held
    /// while the schema is read, never across the backend call.
    pub async fn synthesize(
        &self,
        question: &str,
        history: &ConversationHistory,
        connection: Option<&PooledConnection>,
    ) -> Result<SynthesizedQuery, QueryError> {
        let connection = connection.ok_or(QueryError::ConnectionRequired)?;

        let schema = {
            let mut lease = connection.lease().await.map_err(|e| {
                debug!("Connection {} unusable: {}", connection.id(), e);
                QueryError::ConnectionRequired
            })?;
            self.inspector.describe(lease.session()).await?
        };

        let prompt = build_sql_prompt(&schema, history, question);
        let request = CompletionRequest::new(prompt, self.settings.temperature)
            .with_stop(self.settings.stop.clone())
            .with_timeout(self.settings.timeout);

        let started = Instant::now();
        let raw = self.backend.complete(request).await;
        let elapsed = started.elapsed();
        #[cfg(feature = "cli")]
        crate::metrics::observe_generation(elapsed.as_secs_f64());

        let raw = raw.map_err(|e| {
            warn!("SQL generation failed after {:?}: {}", elapsed, e);
            QueryError::from(e)
        })?;
        debug!(
            "Model {} answered in {:?}: {}",
            self.backend.model(),
            elapsed,
            TextUtils::truncate_with_ellipsis(&raw, 200)
        );

        let query = SynthesizedQuery::vet(&raw)?;
        info!("Synthesized query for session {}: {}", connection.session_id(), query);
        Ok(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ConnectionPool;
    use crate::error::BackendError;
    use crate::history::ConversationTurn;
    use crate::synth::DestructiveOperation;
    use crate::test_support::{sample_config, shop_session, ScriptedBackend, ScriptedConnector};

    async fn shop_connection() -> (Arc<ScriptedConnector>, Arc<PooledConnection>) {
        let connector = Arc::new(ScriptedConnector::with_script(shop_session()));
        let pool = ConnectionPool::new(connector.clone());
        let conn = pool.acquire("s1", &sample_config()).await.unwrap();
        (connector, conn)
    }

    #[tokio::test]
    async fn test_requires_connection() {
        let synth = QuerySynthesizer::new(Arc::new(ScriptedBackend::new()), SynthesisSettings::default());
        let err = synth
            .synthesize("how many orders?", &ConversationHistory::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::ConnectionRequired));
    }

    #[tokio::test]
    async fn test_prompt_carries_schema_history_and_settings() {
        let (_connector, conn) = shop_connection().await;
        let backend = Arc::new(ScriptedBackend::new().reply("```sql\nSELECT COUNT(*) AS count FROM orders\n```"));
        let synth = QuerySynthesizer::new(backend.clone(), SynthesisSettings::default());

        let mut history = ConversationHistory::new();
        history.push(ConversationTurn::new("list customers", "SELECT * FROM customers"));

        let query = synth.synthesize("how many orders?", &history, Some(&conn)).await.unwrap();
        assert_eq!(query.as_str(), "SELECT COUNT(*) AS count FROM orders");

        let requests = backend.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert!(request.prompt.contains("orders"));
        assert!(request.prompt.contains("User: list customers"));
        assert_eq!(request.stop, vec!["```".to_string()]);
        assert_eq!(request.temperature, 0.5);
        assert_eq!(request.timeout, Some(Duration::from_secs(45)));
    }

    #[tokio::test]
    async fn test_backend_failure_is_typed() {
        let (_connector, conn) = shop_connection().await;
        let backend = Arc::new(ScriptedBackend::new().fail(BackendError::Timeout(45)));
        let synth = QuerySynthesizer::new(backend, SynthesisSettings::default());
        let err = synth
            .synthesize("anything", &ConversationHistory::new(), Some(&conn))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::GenerationBackend(BackendError::Timeout(45))));
    }

    #[tokio::test]
    async fn test_unsafe_output_rejected() {
        let (_connector, conn) = shop_connection().await;
        let backend = Arc::new(ScriptedBackend::new().reply("DROP TABLE orders"));
        let synth = QuerySynthesizer::new(backend, SynthesisSettings::default());
        let err = synth
            .synthesize("remove orders", &ConversationHistory::new(), Some(&conn))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::UnsafeOperation(DestructiveOperation::DropTable)));
    }

    #[tokio::test]
    async fn test_schema_failure_skips_backend() {
        let connector = Arc::new(ScriptedConnector::with_script(
            shop_session().on_error("SHOW TABLES", "lost connection"),
        ));
        let pool = ConnectionPool::new(connector);
        let conn = pool.acquire("s1", &sample_config()).await.unwrap();
        let backend = Arc::new(ScriptedBackend::new().reply("SELECT 1"));
        let synth = QuerySynthesizer::new(backend.clone(), SynthesisSettings::default());

        let err = synth
            .synthesize("anything", &ConversationHistory::new(), Some(&conn))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::SchemaUnavailable(_)));
        assert!(backend.requests().is_empty());
    }
}
