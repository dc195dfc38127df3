//! OpenRouter chat-completions client
//!
//! Uses one long-lived reqwest::Client for connection pooling; per-request
//! clients only carry the key and model. No retries: model failures surface to
//! the caller, which owns the fallback.

use super::{CompletionClient, CompletionOptions, LlmConnector, TextStream};
use crate::error::ResearchError;
use crate::models::ChatMessage;
use crate::sse::SseDecoder;
use crate::Result;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

const DONE_SENTINEL: &str = "[DONE]";
const ERROR_BODY_LIMIT: usize = 300;

/// Shared pool + defaults; hands out per-request clients
pub struct OpenRouterConnector {
    client: Client,
    base_url: String,
    default_model: String,
}

impl OpenRouterConnector {
    pub fn new(base_url: impl Into<String>, default_model: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_model: default_model.into(),
        })
    }
}

impl LlmConnector for OpenRouterConnector {
    fn connect(&self, api_key: &str, model: Option<&str>) -> Arc<dyn CompletionClient> {
        let model = model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.default_model);

        Arc::new(OpenRouterClient {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

pub struct OpenRouterClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenRouterClient {
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send(&self, request: &ChatRequest<'_>) -> Result<reqwest::Response> {
        if self.api_key.trim().is_empty() {
            return Err(ResearchError::LlmError("OpenRouter API key not configured".to_string()));
        }

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("X-Title", "Financial Research Assistant")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                let e = e.without_url();
                error!("OpenRouter request failed: {}", e);
                ResearchError::LlmError(format!("request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message: String = body.chars().take(ERROR_BODY_LIMIT).collect();
            error!(status = status.as_u16(), "OpenRouter error response: {}", message);
            return Err(ResearchError::LlmStatus {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionClient for OpenRouterClient {
    async fn complete(&self, messages: &[ChatMessage], options: &CompletionOptions) -> Result<String> {
        let request = ChatRequest::new(&self.model, messages, options, false);
        info!(model = %self.model, messages = messages.len(), "Calling OpenRouter");

        let response: ChatResponse = self
            .send(&request)
            .await?
            .json()
            .await
            .map_err(|e| ResearchError::LlmError(format!("OpenRouter parse error: {}", e)))?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ResearchError::LlmError("Empty response from OpenRouter".to_string()))?;

        debug!(chars = content.len(), "OpenRouter completion received");
        Ok(content)
    }

    async fn stream_complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<TextStream> {
        let request = ChatRequest::new(&self.model, messages, options, true);
        info!(model = %self.model, messages = messages.len(), "Streaming from OpenRouter");

        let response = self.send(&request).await?;
        let mut bytes = response.bytes_stream();

        let stream = async_stream::try_stream! {
            let mut decoder = SseDecoder::new();
            'outer: while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| ResearchError::StreamError(e.without_url().to_string()))?;
                for event in decoder.push(&chunk) {
                    match stream_delta(&event.data)? {
                        StreamPiece::Done => break 'outer,
                        StreamPiece::Text(text) => yield text,
                        StreamPiece::Skip => {}
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

enum StreamPiece {
    Text(String),
    Skip,
    Done,
}

/// Interpret one decoded SSE payload from the completions stream
fn stream_delta(data: &Value) -> Result<StreamPiece> {
    if data.as_str() == Some(DONE_SENTINEL) {
        return Ok(StreamPiece::Done);
    }

    if let Some(err) = data.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(ResearchError::StreamError(message.to_string()));
    }

    let text = data
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty());

    Ok(match text {
        Some(text) => StreamPiece::Text(text.to_string()),
        None => StreamPiece::Skip,
    })
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

impl<'a> ChatRequest<'a> {
    fn new(
        model: &'a str,
        messages: &'a [ChatMessage],
        options: &CompletionOptions,
        stream: bool,
    ) -> Self {
        Self {
            model,
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            response_format: options.json_response.then(|| ResponseFormat {
                kind: "json_object",
            }),
            stream,
        }
    }
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}
