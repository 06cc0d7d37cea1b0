use crate::env::defaults;
use crate::llm::{ChatOptions, ChatResponse, LLMError, Message, TokenUsage};
use crate::stream::StreamId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Metadata key naming the provider that failed before a fallback succeeded
pub const FALLBACK_FROM_KEY: &str = "fallback_from";
/// Metadata key carrying the error text of that failure
pub const ORIGINAL_ERROR_KEY: &str = "original_error";

/// Orchestration core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub default_provider: String,
    pub fallback_providers: Vec<String>,
    pub streaming_enabled: bool,
    pub reasoning_enabled: bool,
    pub max_concurrent_calls: u32,
    pub request_timeout_secs: u64,
    pub stream_buffer_size: usize,
    pub simulated_chunk_delay_ms: u64,
}

impl CoreConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn simulated_chunk_delay(&self) -> Duration {
        Duration::from_millis(self.simulated_chunk_delay_ms)
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            default_provider: defaults::DEFAULT_PROVIDER.to_string(),
            fallback_providers: defaults::FALLBACK_PROVIDERS
                .iter()
                .map(|name| name.to_string())
                .collect(),
            streaming_enabled: true,
            reasoning_enabled: true,
            max_concurrent_calls: defaults::MAX_CONCURRENT_CALLS,
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
            stream_buffer_size: defaults::MIN_STREAM_BUFFER,
            simulated_chunk_delay_ms: defaults::SIMULATED_CHUNK_DELAY_MS,
        }
    }
}

/// A chat request routed through the orchestrator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AIRequest {
    pub messages: Vec<Message>,
    /// Explicit provider; falls back to the active one when absent or unknown
    pub provider: Option<String>,
    pub stream: bool,
    pub enable_thoughts: bool,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u64>,
    pub system_prompt: Option<String>,
    pub context: HashMap<String, serde_json::Value>,
}

impl AIRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn with_thoughts(mut self) -> Self {
        self.enable_thoughts = true;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub(crate) fn chat_options(&self, stream: bool) -> ChatOptions {
        ChatOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            system_prompt: self.system_prompt.clone(),
            stream,
            enable_thoughts: self.enable_thoughts,
        }
    }
}

/// Result of a routed request.
///
/// Either `content` holds the final text, or `stream_id` points at a stream
/// that delivers it incrementally.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AIResponse {
    pub content: String,
    pub provider: String,
    pub model: String,
    pub token_usage: TokenUsage,
    pub process_time: Duration,
    pub has_thoughts: bool,
    pub stream_id: Option<StreamId>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AIResponse {
    pub(crate) fn completed(provider: &str, response: ChatResponse, process_time: Duration) -> Self {
        Self {
            content: response.content,
            provider: provider.to_string(),
            model: response.model,
            token_usage: response.token_usage,
            process_time,
            has_thoughts: false,
            stream_id: None,
            metadata: response.metadata,
        }
    }

    pub(crate) fn streaming(provider: &str, stream_id: StreamId, has_thoughts: bool) -> Self {
        Self {
            provider: provider.to_string(),
            stream_id: Some(stream_id),
            has_thoughts,
            ..Default::default()
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.stream_id.is_some()
    }

    /// Provider that failed before a fallback produced this response
    pub fn fallback_from(&self) -> Option<&str> {
        self.metadata.get(FALLBACK_FROM_KEY).and_then(|v| v.as_str())
    }

    pub fn original_error(&self) -> Option<&str> {
        self.metadata.get(ORIGINAL_ERROR_KEY).and_then(|v| v.as_str())
    }
}

/// Orchestration errors
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("No AI provider available")]
    NoProviderAvailable,
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),
    #[error("Provider {0} reported itself unavailable")]
    ProviderUnavailable(String),
    #[error("All providers failed, {provider} reported: {source}")]
    AllProvidersFailed {
        provider: String,
        #[source]
        source: LLMError,
        attempted: Vec<String>,
    },
    #[error("Stream not found: {0}")]
    StreamNotFound(StreamId),
    #[error("Request cancelled")]
    Cancelled,
}
