//! Moves provider output into a [`StreamWriter`].
//!
//! Providers with native incremental output are forwarded chunk by chunk.
//! Everyone else gets one full `chat` call whose answer is re-segmented on
//! whitespace and emitted one word per chunk, so consumers see the same shape
//! either way.

use crate::llm::{ChatOptions, ChunkSink, LLMError, LLMProvider, Message, StreamingProvider};
use crate::stream::manager::StreamWriter;
use crate::stream::types::{StreamChunk, StreamError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Buffer between a native provider and the pump
const NATIVE_BUFFER: usize = 32;

#[derive(Debug, Clone)]
pub struct PumpSettings {
    /// Pause between simulated word chunks
    pub chunk_delay: Duration,
    /// Upper bound on the whole stream
    pub timeout: Duration,
    /// Forward reasoning/thought chunks
    pub reasoning_enabled: bool,
}

impl Default for PumpSettings {
    fn default() -> Self {
        Self {
            chunk_delay: Duration::from_millis(50),
            timeout: Duration::from_secs(120),
            reasoning_enabled: true,
        }
    }
}

/// How a pump run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    Completed,
    Failed,
    Cancelled,
    TimedOut,
    ConsumerGone,
}

/// Drive one stream to completion. The writer is dropped on return, which
/// closes the queue.
pub async fn pump(
    provider: Arc<dyn LLMProvider>,
    messages: Vec<Message>,
    options: ChatOptions,
    mut writer: StreamWriter,
    settings: PumpSettings,
) -> PumpOutcome {
    let run = async {
        match provider.as_streaming() {
            Some(streamer) => forward_native(streamer, messages, options, &mut writer, &settings).await,
            None => simulate(provider.as_ref(), messages, options, &mut writer, &settings).await,
        }
    };

    let outcome = match tokio::time::timeout(settings.timeout, run).await {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!(
                "Stream from {} timed out after {:?}",
                provider.name(),
                settings.timeout
            );
            if !writer.try_finish(StreamChunk::failed(StreamError::Timeout(settings.timeout))) {
                warn!(
                    "Stream from {} closed without a terminal chunk: queue full at timeout",
                    provider.name()
                );
            }
            PumpOutcome::TimedOut
        }
    };

    debug!("Stream pump for {} finished: {:?}", provider.name(), outcome);
    outcome
}

async fn forward_native(
    streamer: &dyn StreamingProvider,
    messages: Vec<Message>,
    options: ChatOptions,
    writer: &mut StreamWriter,
    settings: &PumpSettings,
) -> PumpOutcome {
    let cancel = writer.cancellation().clone();
    let (native_tx, mut native_rx) = mpsc::channel(NATIVE_BUFFER);
    let mut producer = streamer.chat_stream(messages, options, ChunkSink::new(native_tx, cancel.clone()));

    let mut produced: Option<Result<(), LLMError>> = None;
    let mut source_open = true;

    let result = loop {
        if !source_open && let Some(result) = produced.take() {
            break result;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return PumpOutcome::Cancelled,
            next = native_rx.recv(), if source_open => match next {
                Some(chunk) => {
                    if chunk.is_thought && !settings.reasoning_enabled && !chunk.done && chunk.error.is_none() {
                        continue;
                    }
                    let chunk = StreamChunk::from(chunk);
                    let terminal = chunk.is_terminal();
                    let failed = chunk.error.is_some();
                    if !writer.send(chunk).await {
                        return stopped(writer);
                    }
                    if terminal {
                        return if failed { PumpOutcome::Failed } else { PumpOutcome::Completed };
                    }
                }
                None => source_open = false,
            },
            result = &mut producer, if produced.is_none() => produced = Some(result),
        }
    };

    // Source ended without a terminal chunk of its own
    match result {
        Ok(()) => {
            if writer.send(StreamChunk::finished()).await {
                PumpOutcome::Completed
            } else {
                stopped(writer)
            }
        }
        Err(error) => {
            warn!("Native stream from {} failed: {}", streamer.name(), error);
            writer.send(StreamChunk::failed(error.into())).await;
            PumpOutcome::Failed
        }
    }
}

async fn simulate(
    provider: &dyn LLMProvider,
    messages: Vec<Message>,
    options: ChatOptions,
    writer: &mut StreamWriter,
    settings: &PumpSettings,
) -> PumpOutcome {
    let cancel = writer.cancellation().clone();

    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return PumpOutcome::Cancelled,
        response = provider.chat(messages, options) => response,
    };

    let response = match response {
        Ok(response) => response,
        Err(error) => {
            warn!("Provider {} failed before streaming: {}", provider.name(), error);
            writer.send(StreamChunk::failed(error.into())).await;
            return PumpOutcome::Failed;
        }
    };

    let words: Vec<&str> = response.content.split_whitespace().collect();
    if words.is_empty() {
        return if writer.send(StreamChunk::finished()).await {
            PumpOutcome::Completed
        } else {
            stopped(writer)
        };
    }

    let last = words.len() - 1;
    for (index, word) in words.iter().enumerate() {
        if index > 0 && !settings.chunk_delay.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return PumpOutcome::Cancelled,
                _ = tokio::time::sleep(settings.chunk_delay) => {}
            }
        }
        if !writer.send(StreamChunk::text(format!("{} ", word), index == last)).await {
            return stopped(writer);
        }
    }

    PumpOutcome::Completed
}

fn stopped(writer: &StreamWriter) -> PumpOutcome {
    if writer.cancellation().is_cancelled() {
        PumpOutcome::Cancelled
    } else {
        PumpOutcome::ConsumerGone
    }
}
