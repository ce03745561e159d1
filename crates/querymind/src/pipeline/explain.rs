use std::sync::Arc;
use std::time::Duration;

use futures::stream::{BoxStream, StreamExt};
use tracing::warn;

use crate::db::NormalizedRow;
use crate::llm::{CompletionRequest, GenerationBackend};
use crate::prompt::build_answer_prompt;

/// Sent instead of an explanation when the backend cannot produce one.
pub const FALLBACK_ANSWER: &str =
    "The query ran successfully, but an explanation of the results could not be generated.";

/// Natural-language summaries of query results. Never fails.
#[derive(Clone)]
pub struct Explainer {
    backend: Arc<dyn GenerationBackend>,
    temperature: f32,
    timeout: Duration,
}

impl Explainer {
    pub fn new(backend: Arc<dyn GenerationBackend>, temperature: f32, timeout: Duration) -> Self {
        Self {
            backend,
            temperature,
            timeout,
        }
    }

    fn request(&self, question: &str, sql: &str, rows: &[NormalizedRow]) -> CompletionRequest {
        CompletionRequest::new(build_answer_prompt(question, sql, rows), self.temperature)
            .with_timeout(self.timeout)
    }

    pub async fn explain(&self, question: &str, sql: &str, rows: &[NormalizedRow]) -> String {
        match self.backend.complete(self.request(question, sql, rows)).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                warn!("Explanation came back empty, using fallback");
                FALLBACK_ANSWER.to_string()
            }
            Err(e) => {
                warn!("Explanation failed, using fallback: {}", e);
                FALLBACK_ANSWER.to_string()
            }
        }
    }

    /// Explanation fragments as they arrive. A failure, before or during the
    /// stream, ends it with the fallback message.
    pub fn explain_stream(
        &self,
        question: &str,
        sql: &str,
        rows: &[NormalizedRow],
    ) -> BoxStream<'static, String> {
        let backend = self.backend.clone();
        let request = self.request(question, sql, rows);

        async_stream::stream! {
            let mut produced = false;
            let mut failed = false;
            match backend.complete_stream(request).await {
                Ok(mut tokens) => {
                    while let Some(item) = tokens.next().await {
                        match item {
                            Ok(chunk) if chunk.is_empty() => {}
                            Ok(chunk) => {
                                produced = true;
                                yield chunk;
                            }
                            Err(e) => {
                                warn!("Explanation stream broke off: {}", e);
                                failed = true;
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("Explanation stream could not start: {}", e);
                    failed = true;
                }
            }
            if failed || !produced {
                yield FALLBACK_ANSWER.to_string();
            }
        }
        .boxed()
    }
}
