use crate::stream::types::{MIN_STREAM_BUFFER, StreamChunk, StreamError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub type StreamId = String;

static STREAM_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Allocate a time-derived stream identifier that is never reused within the process
pub fn next_stream_id() -> StreamId {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let seq = STREAM_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("stream_{}_{}", nanos, seq)
}

/// Live state of one stream, as held by the [`StreamManager`]
#[derive(Debug)]
pub struct StreamContext {
    pub id: StreamId,
    pub provider: String,
    pub created_at: DateTime<Utc>,
    receiver: Arc<Mutex<mpsc::Receiver<StreamChunk>>>,
    cancel: CancellationToken,
}

impl StreamContext {
    /// Create a stream and the single writer that feeds it.
    ///
    /// The queue closes when the returned [`StreamWriter`] is dropped.
    pub fn open(
        id: StreamId,
        provider: impl Into<String>,
        capacity: usize,
        parent: &CancellationToken,
    ) -> (Self, StreamWriter) {
        let (tx, rx) = mpsc::channel(capacity.max(MIN_STREAM_BUFFER));
        let cancel = parent.child_token();

        let context = Self {
            id,
            provider: provider.into(),
            created_at: Utc::now(),
            receiver: Arc::new(Mutex::new(rx)),
            cancel: cancel.clone(),
        };
        let writer = StreamWriter {
            tx,
            cancel,
            finished: false,
        };

        (context, writer)
    }

    pub fn read_handle(&self) -> StreamHandle {
        StreamHandle {
            id: self.id.clone(),
            provider: self.provider.clone(),
            created_at: self.created_at,
            receiver: self.receiver.clone(),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Exclusive write end of a stream, owned by the pump task
#[derive(Debug)]
pub struct StreamWriter {
    tx: mpsc::Sender<StreamChunk>,
    cancel: CancellationToken,
    finished: bool,
}

impl StreamWriter {
    /// Queue a chunk, waiting for room if the consumer is behind.
    ///
    /// Returns `false` if the stream was cancelled, the consumer is gone, or a
    /// terminal chunk was already written.
    pub async fn send(&mut self, chunk: StreamChunk) -> bool {
        if self.finished || self.cancel.is_cancelled() {
            return false;
        }
        let terminal = chunk.is_terminal();
        let sent = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(chunk) => sent.is_ok(),
        };
        if sent && terminal {
            self.finished = true;
        }
        sent
    }

    /// Queue a terminal chunk without waiting; dropped if the queue is full
    pub fn try_finish(&mut self, chunk: StreamChunk) -> bool {
        if self.finished {
            return false;
        }
        self.finished = true;
        self.tx.try_send(chunk).is_ok()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Read-only view of a stream handed to consumers
#[derive(Debug, Clone)]
pub struct StreamHandle {
    pub id: StreamId,
    pub provider: String,
    pub created_at: DateTime<Utc>,
    receiver: Arc<Mutex<mpsc::Receiver<StreamChunk>>>,
}

impl StreamHandle {
    /// Next chunk in emission order, or `None` once the stream is closed
    pub async fn recv(&self) -> Option<StreamChunk> {
        self.receiver.lock().await.recv().await
    }

    pub fn into_stream(self) -> BoxStream<'static, StreamChunk> {
        stream::unfold(self, |handle| async move {
            let chunk = handle.recv().await?;
            Some((chunk, handle))
        })
        .boxed()
    }

    /// Drain the stream and concatenate the answer text, skipping thoughts
    pub async fn collect_text(&self) -> Result<String, StreamError> {
        let mut text = String::new();
        while let Some(chunk) = self.recv().await {
            if let Some(error) = chunk.error {
                return Err(error);
            }
            if !chunk.is_thought {
                text.push_str(&chunk.content);
            }
            if chunk.done {
                break;
            }
        }
        Ok(text)
    }
}

/// Concurrent registry of in-flight streams
#[derive(Debug, Default)]
pub struct StreamManager {
    streams: DashMap<StreamId, StreamContext>,
}

impl StreamManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream under its identifier. Returns `false` if the id is taken.
    pub fn add(&self, id: StreamId, context: StreamContext) -> bool {
        match self.streams.entry(id) {
            Entry::Occupied(entry) => {
                debug!("Stream {} already registered", entry.key());
                false
            }
            Entry::Vacant(entry) => {
                debug!("Registered stream {}", entry.key());
                entry.insert(context);
                true
            }
        }
    }

    /// Unregister a stream. Removing an unknown id is a no-op.
    pub fn remove(&self, id: &str) -> Option<StreamContext> {
        let removed = self.streams.remove(id).map(|(_, context)| context);
        if removed.is_some() {
            debug!("Removed stream {}", id);
        }
        removed
    }

    pub fn get_read_handle(&self, id: &str) -> Option<StreamHandle> {
        self.streams.get(id).map(|context| context.read_handle())
    }

    /// Fire the cancellation signal of a stream. Returns `false` if it is unknown.
    pub fn cancel(&self, id: &str) -> bool {
        match self.streams.get(id) {
            Some(context) => {
                context.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for context in self.streams.iter() {
            context.cancel();
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.streams.contains_key(id)
    }

    pub fn ids(&self) -> Vec<StreamId> {
        self.streams.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
