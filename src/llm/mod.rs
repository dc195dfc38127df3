//! Chat-completion abstraction
//!
//! Every model call in the pipeline goes through `CompletionClient`, so the
//! planner, summarizer and answer stream can be driven by a scripted client in tests.
//! Clients are built per request by an `LlmConnector` because the key may come
//! from the client.

use crate::models::ChatMessage;
use crate::Result;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

pub mod openrouter;

pub use openrouter::{OpenRouterClient, OpenRouterConnector};

/// Incremental answer text
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the provider for a JSON object response
    pub json_response: bool,
}

impl CompletionOptions {
    pub fn new(temperature: f32, max_tokens: u32) -> Self {
        Self {
            temperature,
            max_tokens,
            json_response: false,
        }
    }

    pub fn json(mut self) -> Self {
        self.json_response = true;
        self
    }
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// One-shot completion returning the full message text
    async fn complete(&self, messages: &[ChatMessage], options: &CompletionOptions) -> Result<String>;

    /// Streaming completion yielding text deltas in order
    async fn stream_complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<TextStream>;
}

/// Builds a completion client for one request
pub trait LlmConnector: Send + Sync {
    fn connect(&self, api_key: &str, model: Option<&str>) -> Arc<dyn CompletionClient>;
}
