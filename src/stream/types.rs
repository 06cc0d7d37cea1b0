use crate::llm::{ChunkKind, LLMError, ProviderChunk};
use std::time::Duration;

/// Minimum queue capacity for a stream
pub const MIN_STREAM_BUFFER: usize = crate::env::defaults::MIN_STREAM_BUFFER;

/// One incremental piece of a streamed response
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    pub content: String,
    pub kind: ChunkKind,
    pub is_thought: bool,
    /// Append to previously received content rather than replace it
    pub delta: bool,
    /// Terminal marker
    pub done: bool,
    pub error: Option<StreamError>,
}

impl StreamChunk {
    pub fn text(content: impl Into<String>, done: bool) -> Self {
        Self {
            content: content.into(),
            kind: ChunkKind::Text,
            delta: true,
            done,
            ..Default::default()
        }
    }

    pub fn finished() -> Self {
        Self {
            done: true,
            ..Default::default()
        }
    }

    pub fn failed(error: StreamError) -> Self {
        Self {
            done: true,
            error: Some(error),
            ..Default::default()
        }
    }

    /// No chunk may follow a terminal one
    pub fn is_terminal(&self) -> bool {
        self.done || self.error.is_some()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

impl From<ProviderChunk> for StreamChunk {
    /// An error chunk is always terminal, whatever `done` the provider set
    fn from(chunk: ProviderChunk) -> Self {
        Self {
            content: chunk.content,
            kind: chunk.kind,
            is_thought: chunk.is_thought,
            delta: chunk.delta,
            done: chunk.done || chunk.error.is_some(),
            error: chunk.error.map(StreamError::Provider),
        }
    }
}

/// Error carried inside a chunk
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
    #[error("Provider failed during streaming: {0}")]
    Provider(#[from] LLMError),
    #[error("Stream timed out after {0:?}")]
    Timeout(Duration),
}
