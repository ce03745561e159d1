//! Language-generation backends.

pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::GenerationConfig;
use crate::error::BackendError;

pub use openai::OpenAiBackend;

/// Incremental text fragments from a streaming completion.
pub type TokenStream = BoxStream<'static, Result<String, BackendError>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub temperature: f32,
    #[serde(default)]
    pub stop: Vec<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, temperature: f32) -> Self {
        Self {
            prompt: prompt.into(),
            temperature: temperature.clamp(0.0, 1.0),
            stop: Vec::new(),
            max_tokens: None,
            timeout: None,
        }
    }

    pub fn with_stop(mut self, stop: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.stop = stop.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn model(&self) -> &str;

    /// Whole completion in one response.
    async fn complete(&self, request: CompletionRequest) -> Result<String, BackendError>;

    /// Completion delivered fragment by fragment.
    async fn complete_stream(&self, request: CompletionRequest) -> Result<TokenStream, BackendError>;
}

/// Build the process-wide backend, failing fast on unusable configuration.
pub fn create_backend(config: &GenerationConfig) -> Result<Arc<dyn GenerationBackend>, BackendError> {
    let backend = OpenAiBackend::new(config)?;
    info!(
        "Generation backend ready: model={} endpoint={}",
        backend.model(),
        config.base_url
    );
    Ok(Arc::new(backend))
}
