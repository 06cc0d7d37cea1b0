use crate::context::{ContextStore, ContextStoreConfig};
use crate::runtime::types::*;
use anyhow::{Result, bail};
use chrono::Utc;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type HandlerMap = HashMap<EventType, Vec<Arc<dyn EventHandler>>>;

#[derive(Debug, Default)]
struct StatCounters {
    emitted: AtomicU64,
    dropped: AtomicU64,
    dispatched: AtomicU64,
    handler_failures: AtomicU64,
}

impl StatCounters {
    fn snapshot(&self) -> RuntimeStats {
        RuntimeStats {
            emitted: self.emitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }
}

/// Asynchronous publish/subscribe bus.
///
/// Emission never blocks. Each handler runs as its own task, and a handler
/// that errors or panics only shows up in the logs and in
/// [`RuntimeStats::handler_failures`]. The runtime owns a [`ContextStore`]
/// that lives and stops with it.
pub struct Runtime {
    config: RuntimeConfig,
    sender: mpsc::Sender<Event>,
    receiver: StdMutex<Option<mpsc::Receiver<Event>>>,
    handlers: Arc<RwLock<HandlerMap>>,
    context: ContextStore,
    stats: Arc<StatCounters>,
    shutdown: CancellationToken,
    event_loop: StdMutex<Option<JoinHandle<()>>>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig, context_config: ContextStoreConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.event_queue_capacity.max(1));

        Self {
            config,
            sender,
            receiver: StdMutex::new(Some(receiver)),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            context: ContextStore::new(context_config),
            stats: Arc::new(StatCounters::default()),
            shutdown: CancellationToken::new(),
            event_loop: StdMutex::new(None),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Spawn the event loop and the context store's background eviction
    pub fn start(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            bail!("Runtime has been stopped and cannot be restarted");
        }

        let receiver = match self.receiver.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => bail!("Runtime receiver lock poisoned"),
        };
        let Some(receiver) = receiver else {
            bail!("Runtime already started");
        };

        let handle = tokio::spawn(event_loop(
            receiver,
            self.handlers.clone(),
            self.stats.clone(),
            self.shutdown.clone(),
        ));
        match self.event_loop.lock() {
            Ok(mut guard) => *guard = Some(handle),
            Err(_) => bail!("Runtime event loop lock poisoned"),
        }

        self.context.start_eviction();
        info!(
            "Runtime started (event queue capacity {})",
            self.config.event_queue_capacity
        );
        Ok(())
    }

    /// Stop the event loop, then close the context store.
    ///
    /// Events already queued are still dispatched; later emissions are
    /// dropped. Safe to call more than once.
    pub async fn stop(&self) {
        self.shutdown.cancel();

        let handle = self.event_loop.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Runtime event loop ended abnormally: {}", e);
            }
            info!("Runtime stopped");
        }

        self.context.close();
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
            && self
                .event_loop
                .lock()
                .map(|guard| guard.as_ref().is_some_and(|handle| !handle.is_finished()))
                .unwrap_or(false)
    }

    /// Queue an event without waiting.
    ///
    /// Assigns the timestamp and, when empty, a fresh id. Dropped with a
    /// warning when the queue is full, and silently once the runtime stopped.
    pub fn emit(&self, mut event: Event) {
        if self.shutdown.is_cancelled() {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("Runtime stopped, dropping {} event", event.event_type);
            return;
        }

        event.timestamp = Utc::now();
        if event.id.is_empty() {
            event.id = uuid::Uuid::new_v4().to_string();
        }

        match self.sender.try_send(event) {
            Ok(()) => {
                self.stats.emitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Event queue full, dropping {} event {}",
                    event.event_type, event.id
                );
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Event loop gone, dropping {} event {}", event.event_type, event.id);
            }
        }
    }

    pub async fn subscribe<H>(&self, event_type: EventType, handler: H)
    where
        H: EventHandler + 'static,
    {
        let mut handlers = self.handlers.write().await;
        handlers
            .entry(event_type)
            .or_default()
            .push(Arc::new(handler));
        debug!("Subscribed handler to {} events", event_type);
    }

    pub async fn handler_count(&self, event_type: EventType) -> usize {
        self.handlers
            .read()
            .await
            .get(&event_type)
            .map_or(0, Vec::len)
    }

    pub fn context(&self) -> &ContextStore {
        &self.context
    }

    pub fn stats(&self) -> RuntimeStats {
        self.stats.snapshot()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn event_loop(
    mut receiver: mpsc::Receiver<Event>,
    handlers: Arc<RwLock<HandlerMap>>,
    stats: Arc<StatCounters>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = receiver.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        dispatch(&handlers, &stats, event).await;
    }

    // Deliver what was queued before the stop signal, accept nothing new
    receiver.close();
    let mut drained = 0;
    while let Some(event) = receiver.recv().await {
        dispatch(&handlers, &stats, event).await;
        drained += 1;
    }
    debug!("Runtime event loop exited ({} queued events drained)", drained);
}

/// Start one task per subscribed handler; never waits for them
async fn dispatch(handlers: &RwLock<HandlerMap>, stats: &Arc<StatCounters>, event: Event) {
    let subscribed = handlers
        .read()
        .await
        .get(&event.event_type)
        .cloned()
        .unwrap_or_default();

    if subscribed.is_empty() {
        debug!("No handlers for {} event {}", event.event_type, event.id);
        return;
    }

    for handler in subscribed {
        stats.dispatched.fetch_add(1, Ordering::Relaxed);
        let stats = stats.clone();
        let event = event.clone();

        tokio::spawn(async move {
            let event_type = event.event_type;
            let event_id = event.id.clone();
            let outcome = AssertUnwindSafe(async move { handler.handle(event).await })
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    stats.handler_failures.fetch_add(1, Ordering::Relaxed);
                    warn!("Handler for {} event {} failed: {}", event_type, event_id, e);
                }
                Err(_) => {
                    stats.handler_failures.fetch_add(1, Ordering::Relaxed);
                    error!("Handler for {} event {} panicked", event_type, event_id);
                }
            }
        });
    }
}
