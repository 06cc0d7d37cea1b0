//! Scripted providers for unit tests

use crate::llm::{
    ChatOptions, ChatResponse, ChunkSink, LLMError, LLMProvider, Message, ProviderChunk,
    StreamingProvider, TokenUsage,
};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub struct ScriptedProvider {
    name: String,
    available: bool,
    reply: Result<String, LLMError>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn replying(name: &str, reply: &str) -> Self {
        Self {
            name: name.to_string(),
            available: true,
            reply: Ok(reply.to_string()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(name: &str, message: &str) -> Self {
        Self {
            reply: Err(LLMError::Network(message.to_string())),
            ..Self::replying(name, "")
        }
    }

    pub fn unavailable(name: &str) -> Self {
        Self {
            available: false,
            ..Self::replying(name, "")
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move { self.available })
    }

    fn chat(
        &self,
        messages: Vec<Message>,
        _options: ChatOptions,
    ) -> BoxFuture<'_, Result<ChatResponse, LLMError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let content = self.reply.clone()?;
            let input: u64 = messages.iter().map(|m| self.estimate_tokens(&m.content)).sum();
            let output = self.estimate_tokens(&content);
            Ok(ChatResponse::new(content, format!("{}-model", self.name))
                .with_token_usage(TokenUsage::new(input, output)))
        })
    }
}

pub struct ScriptedStreamingProvider {
    name: String,
    chunks: Vec<ProviderChunk>,
    outcome: Result<(), LLMError>,
    delay: Duration,
}

impl ScriptedStreamingProvider {
    pub fn new(name: &str, chunks: Vec<ProviderChunk>) -> Self {
        Self {
            name: name.to_string(),
            chunks,
            outcome: Ok(()),
            delay: Duration::ZERO,
        }
    }

    pub fn ending_with(mut self, outcome: Result<(), LLMError>) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl LLMProvider for ScriptedStreamingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> BoxFuture<'_, bool> {
        Box::pin(async { true })
    }

    fn chat(
        &self,
        _messages: Vec<Message>,
        _options: ChatOptions,
    ) -> BoxFuture<'_, Result<ChatResponse, LLMError>> {
        Box::pin(async move {
            let content: String = self
                .chunks
                .iter()
                .filter(|c| !c.is_thought)
                .map(|c| c.content.as_str())
                .collect();
            Ok(ChatResponse::new(content, "scripted-stream"))
        })
    }

    fn as_streaming(&self) -> Option<&dyn StreamingProvider> {
        Some(self)
    }
}

impl StreamingProvider for ScriptedStreamingProvider {
    fn chat_stream(
        &self,
        _messages: Vec<Message>,
        _options: ChatOptions,
        sink: ChunkSink,
    ) -> BoxFuture<'_, Result<(), LLMError>> {
        Box::pin(async move {
            for chunk in &self.chunks {
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                if !sink.send(chunk.clone()).await {
                    return Ok(());
                }
            }
            self.outcome.clone()
        })
    }
}
