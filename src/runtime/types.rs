use crate::env::defaults;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;

/// Built-in event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "capability.load")]
    CapabilityLoad,
    #[serde(rename = "capability.unload")]
    CapabilityUnload,
    #[serde(rename = "message")]
    Message,
    #[serde(rename = "config")]
    Config,
    #[serde(rename = "behavioral")]
    Behavioral,
    #[serde(rename = "system")]
    System,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::CapabilityLoad => "capability.load",
            EventType::CapabilityUnload => "capability.unload",
            EventType::Message => "message",
            EventType::Config => "config",
            EventType::Behavioral => "behavioral",
            EventType::System => "system",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed event delivered to subscribers.
///
/// `id` and `timestamp` are assigned by [`crate::runtime::Runtime::emit`];
/// an id set by the caller is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: EventType, source: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            event_type,
            source: source.into(),
            target: None,
            data: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

/// Subscriber callback. Any `Fn(Event) -> impl Future<Output = anyhow::Result<()>>`
/// qualifies.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: Event) -> BoxFuture<'static, anyhow::Result<()>>;
}

impl<F, Fut> EventHandler for F
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn handle(&self, event: Event) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(self(event))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub event_queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: defaults::EVENT_QUEUE_CAPACITY,
        }
    }
}

/// Counters describing what the bus has done so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeStats {
    pub emitted: u64,
    /// Events refused because the queue was full or the bus had stopped
    pub dropped: u64,
    /// Handler invocations started
    pub dispatched: u64,
    /// Handler invocations that returned an error or panicked
    pub handler_failures: u64,
}
