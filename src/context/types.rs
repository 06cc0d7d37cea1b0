use crate::env::defaults;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub type ContextId = String;

/// Kind of contextual memory an entry holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextType {
    Memory,
    Session,
    Behavioral,
    Capability,
}

/// One unit of retained context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub id: ContextId,
    #[serde(rename = "type")]
    pub context_type: ContextType,
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    /// Always within [0.0, 1.0] once stored
    pub relevance: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<Duration>,
}

impl ContextEntry {
    pub const DEFAULT_RELEVANCE: f64 = 0.5;

    pub fn new(context_type: ContextType, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            context_type,
            content: content.into(),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
            relevance: Self::DEFAULT_RELEVANCE,
            ttl: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<ContextId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_relevance(mut self, relevance: f64) -> Self {
        self.relevance = relevance;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Time since creation; zero for timestamps in the future
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.timestamp)
            .to_std()
            .unwrap_or_default()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.ttl.is_some_and(|ttl| self.age(now) > ttl)
    }
}

/// Clamp into [0.0, 1.0]; NaN counts as irrelevant
pub(crate) fn clamp_relevance(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Context store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextStoreConfig {
    pub max_entries_per_type: usize,
    pub cleanup_interval_ms: u64,
    pub low_relevance_threshold: f64,
    pub low_relevance_max_age_secs: u64,
}

impl ContextStoreConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms.max(1))
    }

    pub fn low_relevance_max_age(&self) -> Duration {
        Duration::from_secs(self.low_relevance_max_age_secs)
    }
}

impl Default for ContextStoreConfig {
    fn default() -> Self {
        Self {
            max_entries_per_type: defaults::MAX_CONTEXT_ENTRIES_PER_TYPE,
            cleanup_interval_ms: defaults::CONTEXT_CLEANUP_INTERVAL_MS,
            low_relevance_threshold: defaults::LOW_RELEVANCE_THRESHOLD,
            low_relevance_max_age_secs: defaults::LOW_RELEVANCE_MAX_AGE_SECS,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ContextError {
    #[error("Context entry not found: {0}")]
    NotFound(ContextId),
    #[error("Context serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ContextError {
    fn from(error: serde_json::Error) -> Self {
        ContextError::Serialization(error.to_string())
    }
}
