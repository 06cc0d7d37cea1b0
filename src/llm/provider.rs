use crate::llm::types::{ChatOptions, ChatResponse, LLMError, Message, ProviderChunk};
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Generic LLM Provider trait that can be implemented by any backend
pub trait LLMProvider: Send + Sync {
    /// Get provider name/identifier. Used as the registration key.
    fn name(&self) -> &str;

    /// Check whether the backend can serve requests.
    ///
    /// The orchestrator calls this once, at registration time.
    fn is_available(&self) -> BoxFuture<'_, bool>;

    /// Execute a complete chat exchange and return the full answer
    fn chat(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> BoxFuture<'_, Result<ChatResponse, LLMError>>;

    /// Probe for native incremental output.
    ///
    /// Providers that implement [`StreamingProvider`] override this to return
    /// `Some(self)`. Everyone else gets simulated streaming.
    fn as_streaming(&self) -> Option<&dyn StreamingProvider> {
        None
    }

    /// Estimate token count for text (~4 characters per token)
    fn estimate_tokens(&self, text: &str) -> u64 {
        (text.len() as f64 / 4.0).ceil() as u64
    }
}

/// Optional capability for providers that emit output incrementally
pub trait StreamingProvider: LLMProvider {
    /// Push chunks into `sink` until the answer is complete.
    ///
    /// Returning `Err` after pushing some chunks is fine; the pump turns it into
    /// a terminal error chunk.
    fn chat_stream(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
        sink: ChunkSink,
    ) -> BoxFuture<'_, Result<(), LLMError>>;
}

/// Write end handed to a [`StreamingProvider`]
///
/// Dropping the sink tells the pump that the native source has finished.
#[derive(Debug, Clone)]
pub struct ChunkSink {
    tx: mpsc::Sender<ProviderChunk>,
    cancel: CancellationToken,
}

impl ChunkSink {
    pub fn new(tx: mpsc::Sender<ProviderChunk>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    /// Deliver a chunk. Returns `false` once the consumer is gone or the stream was
    /// cancelled; providers should stop producing at that point.
    pub async fn send(&self, chunk: ProviderChunk) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(chunk) => sent.is_ok(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Token that fires when the stream is cancelled or times out
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}
