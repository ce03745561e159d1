//! OpenAI-compatible chat-completions client.
//!
//! Works against any server exposing `{base_url}/chat/completions`, streaming
//! or not. Every request carries a hard timeout and fails closed.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{CompletionRequest, GenerationBackend, TokenStream};
use crate::config::GenerationConfig;
use crate::error::BackendError;

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop: &'a [String],
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<ChatDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
struct ChatDelta {
    content: Option<String>,
}

pub struct OpenAiBackend {
    base_url: String,
    api_key: Option<String>,
    model: String,
    default_timeout: Duration,
    http_client: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(config: &GenerationConfig) -> Result<Self, BackendError> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(BackendError::InvalidConfig("LLM_BASE_URL is empty".into()));
        }
        if reqwest::Url::parse(&base_url).is_err() {
            return Err(BackendError::InvalidConfig(format!(
                "LLM_BASE_URL is not a valid URL: {}",
                base_url
            )));
        }
        if config.model.trim().is_empty() {
            return Err(BackendError::InvalidConfig("LLM_MODEL is empty".into()));
        }

        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| BackendError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            base_url,
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            model: config.model.clone(),
            default_timeout: Duration::from_secs(config.timeout_seconds),
            http_client,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn send(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, BackendError> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stop: &request.stop,
            stream,
        };

        let mut builder = self
            .http_client
            .post(self.completions_url())
            .timeout(timeout)
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout(timeout.as_secs())
            } else {
                BackendError::Transport(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!("Generation backend returned {}", status);
            return Err(BackendError::Status { status, body });
        }
        Ok(response)
    }
}

#[async_trait]
impl GenerationBackend for OpenAiBackend {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, BackendError> {
        debug!(
            "Requesting completion ({} chars, temperature {})",
            request.prompt.len(),
            request.temperature
        );
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let response = self.send(&request, false).await?;

        let completion: ChatCompletionResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout(timeout.as_secs())
            } else {
                BackendError::Malformed(e.to_string())
            }
        })?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .map(|m| m.content)
            .unwrap_or_default();
        Ok(content)
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<TokenStream, BackendError> {
        debug!("Requesting streaming completion ({} chars)", request.prompt.len());
        let response = self.send(&request, true).await?;
        let byte_stream = response.bytes_stream();

        let sse_stream = async_stream::try_stream! {
            // Raw bytes until a full line arrives; a network chunk may end
            // inside a multi-byte character.
            let mut buffer: Vec<u8> = Vec::new();
            futures_util::pin_mut!(byte_stream);

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = chunk_result
                    .map_err(|e| BackendError::Transport(format!("stream read error: {}", e)))?;
                buffer.extend_from_slice(&chunk);

                while let Some(newline_pos) = buffer.iter().position(|b| *b == b'\n') {
                    let raw_line: Vec<u8> = buffer.drain(..=newline_pos).collect();
                    let line = match std::str::from_utf8(&raw_line) {
                        Ok(text) => text.trim().to_string(),
                        Err(e) => {
                            warn!("Dropping stream line with invalid UTF-8: {}", e);
                            continue;
                        }
                    };

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        return;
                    }

                    match serde_json::from_str::<StreamChunk>(data) {
                        Ok(chunk) => {
                            let finished = chunk.choices.iter().any(|c| c.finish_reason.is_some());
                            for choice in chunk.choices {
                                if let Some(content) = choice.delta.and_then(|d| d.content) {
                                    if !content.is_empty() {
                                        yield content;
                                    }
                                }
                            }
                            if finished {
                                return;
                            }
                        }
                        Err(e) => {
                            debug!("Skipping unparseable stream chunk: {}", e);
                        }
                    }
                }
            }
        };

        Ok(Box::pin(sse_stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use std::io::Write;

    fn backend_for(server: &mockito::ServerGuard) -> OpenAiBackend {
        OpenAiBackend::new(&GenerationConfig {
            base_url: format!("{}/v1", server.url()),
            api_key: Some("sk-test-key".into()),
            model: "test-model".into(),
            ..GenerationConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_complete_returns_first_choice() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test-key")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "model": "test-model",
                "stream": false,
                "stop": ["```"]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"SELECT 1"}}]}"#)
            .create_async()
            .await;

        let backend = backend_for(&server);
        let text = backend
            .complete(CompletionRequest::new("prompt", 0.5).with_stop(["```"]))
            .await
            .unwrap();
        assert_eq!(text, "SELECT 1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_complete_surfaces_http_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(401)
            .with_body("bad key")
            .create_async()
            .await;

        let backend = backend_for(&server);
        let err = backend.complete(CompletionRequest::new("p", 0.5)).await.unwrap_err();
        match err {
            BackendError::Status { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "bad key");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stream_yields_delta_content() {
        let mut server = mockito::Server::new_async().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"There are \"},\"finish_reason\":null}]}\n\n",
            ": keep-alive\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"3 orders.\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n"
        );
        server
            .mock("POST", "/v1/chat/completions")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({"stream": true})))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let backend = backend_for(&server);
        let stream = backend
            .complete_stream(CompletionRequest::new("p", 0.7))
            .await
            .unwrap();
        let chunks: Vec<String> = stream.try_collect().await.unwrap();
        assert_eq!(chunks, vec!["There are ".to_string(), "3 orders.".to_string()]);
    }

    #[tokio::test]
    async fn test_stream_keeps_characters_split_across_chunks() {
        let mut server = mockito::Server::new_async().await;
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"共3个订单\"},\"finish_reason\":null}]}\n\n";
        let bytes = line.as_bytes().to_vec();
        // Cut one byte into the first character of the content.
        let split = line.find('共').unwrap() + 1;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_chunked_body(move |w| {
                w.write_all(&bytes[..split])?;
                w.flush()?;
                w.write_all(&bytes[split..])?;
                w.write_all(b"data: [DONE]\n\n")
            })
            .create_async()
            .await;

        let backend = backend_for(&server);
        let stream = backend
            .complete_stream(CompletionRequest::new("p", 0.7))
            .await
            .unwrap();
        let chunks: Vec<String> = stream.try_collect().await.unwrap();
        assert_eq!(chunks, vec!["共3个订单".to_string()]);
    }

    #[test]
    fn test_rejects_invalid_url() {
        let cfg = GenerationConfig {
            base_url: "not a url".into(),
            ..GenerationConfig::default()
        };
        assert!(matches!(OpenAiBackend::new(&cfg), Err(BackendError::InvalidConfig(_))));
    }
}
