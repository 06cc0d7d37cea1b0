use crate::context::types::*;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bounded, typed store of contextual memory with relevance scoring and
/// TTL-based expiry
#[derive(Debug)]
pub struct ContextStore {
    inner: Arc<StoreInner>,
    shutdown: CancellationToken,
    eviction_task: StdMutex<Option<JoinHandle<()>>>,
}

#[derive(Debug)]
struct StoreInner {
    config: ContextStoreConfig,
    state: RwLock<StoreState>,
}

#[derive(Debug, Default)]
struct StoreState {
    entries: HashMap<ContextId, StoredEntry>,
    type_counts: HashMap<ContextType, usize>,
    next_seq: u64,
}

/// Insertion sequence breaks timestamp ties when trimming a type
#[derive(Debug, Clone)]
struct StoredEntry {
    entry: ContextEntry,
    seq: u64,
}

impl StoreState {
    fn insert(&mut self, mut entry: ContextEntry) {
        entry.relevance = clamp_relevance(entry.relevance);
        self.remove(&entry.id);

        *self.type_counts.entry(entry.context_type).or_insert(0) += 1;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(entry.id.clone(), StoredEntry { entry, seq });
    }

    fn remove(&mut self, id: &str) -> Option<ContextEntry> {
        let stored = self.entries.remove(id)?;
        if let Some(count) = self.type_counts.get_mut(&stored.entry.context_type) {
            *count = count.saturating_sub(1);
        }
        Some(stored.entry)
    }

    fn count(&self, context_type: ContextType) -> usize {
        self.type_counts.get(&context_type).copied().unwrap_or(0)
    }

    /// Drop the oldest entries of `context_type` until at most `max` remain
    fn enforce_max_entries(&mut self, context_type: ContextType, max: usize) -> usize {
        let count = self.count(context_type);
        if count <= max {
            return 0;
        }

        let mut of_type: Vec<(DateTime<Utc>, u64, ContextId)> = self
            .entries
            .values()
            .filter(|stored| stored.entry.context_type == context_type)
            .map(|stored| (stored.entry.timestamp, stored.seq, stored.entry.id.clone()))
            .collect();
        of_type.sort();

        let excess = count - max;
        for (_, _, id) in of_type.into_iter().take(excess) {
            self.remove(&id);
        }
        excess
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.type_counts.clear();
    }
}

impl StoreInner {
    /// One eviction pass over TTL-expired and stale low-relevance entries
    async fn sweep(&self) -> usize {
        let now = Utc::now();
        let threshold = self.config.low_relevance_threshold;
        let max_age = self.config.low_relevance_max_age();

        let mut state = self.state.write().await;
        let doomed: Vec<ContextId> = state
            .entries
            .values()
            .map(|stored| &stored.entry)
            .filter(|entry| {
                entry.is_expired(now) || (entry.relevance < threshold && entry.age(now) > max_age)
            })
            .map(|entry| entry.id.clone())
            .collect();

        for id in &doomed {
            state.remove(id);
        }
        doomed.len()
    }
}

impl ContextStore {
    pub fn new(config: ContextStoreConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                config,
                state: RwLock::new(StoreState::default()),
            }),
            shutdown: CancellationToken::new(),
            eviction_task: StdMutex::new(None),
        }
    }

    pub fn config(&self) -> &ContextStoreConfig {
        &self.inner.config
    }

    /// Insert or replace an entry, then trim its type to the configured maximum
    pub async fn add(&self, entry: ContextEntry) {
        let context_type = entry.context_type;
        let mut state = self.inner.state.write().await;
        state.insert(entry);

        let max = self.inner.config.max_entries_per_type;
        let evicted = state.enforce_max_entries(context_type, max);
        if evicted > 0 {
            debug!("Evicted {} oldest {:?} entries over capacity", evicted, context_type);
        }
    }

    pub async fn get(&self, id: &str) -> Option<ContextEntry> {
        let state = self.inner.state.read().await;
        state.entries.get(id).map(|stored| stored.entry.clone())
    }

    /// Entries of one type, oldest first
    pub async fn get_by_type(&self, context_type: ContextType) -> Vec<ContextEntry> {
        let state = self.inner.state.read().await;
        let mut entries: Vec<&StoredEntry> = state
            .entries
            .values()
            .filter(|stored| stored.entry.context_type == context_type)
            .collect();
        entries.sort_by_key(|stored| (stored.entry.timestamp, stored.seq));
        entries.into_iter().map(|stored| stored.entry.clone()).collect()
    }

    /// Entries with relevance at or above `threshold`, most relevant first.
    ///
    /// A `limit` of zero returns every match.
    pub async fn get_relevant(&self, threshold: f64, limit: usize) -> Vec<ContextEntry> {
        let state = self.inner.state.read().await;
        let mut relevant: Vec<ContextEntry> = state
            .entries
            .values()
            .filter(|stored| stored.entry.relevance >= threshold)
            .map(|stored| stored.entry.clone())
            .collect();
        relevant.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));

        if limit > 0 {
            relevant.truncate(limit);
        }
        relevant
    }

    pub async fn update_relevance(&self, id: &str, relevance: f64) -> Result<(), ContextError> {
        let mut state = self.inner.state.write().await;
        let stored = state
            .entries
            .get_mut(id)
            .ok_or_else(|| ContextError::NotFound(id.to_string()))?;
        stored.entry.relevance = clamp_relevance(relevance);
        Ok(())
    }

    /// Remove an entry; removing an unknown id is a no-op
    pub async fn remove(&self, id: &str) -> Option<ContextEntry> {
        self.inner.state.write().await.remove(id)
    }

    /// Remove every entry of one type, returning how many went
    pub async fn clear(&self, context_type: ContextType) -> usize {
        let mut state = self.inner.state.write().await;
        let ids: Vec<ContextId> = state
            .entries
            .values()
            .filter(|stored| stored.entry.context_type == context_type)
            .map(|stored| stored.entry.id.clone())
            .collect();
        for id in &ids {
            state.remove(id);
        }
        ids.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.state.read().await.entries.is_empty()
    }

    /// Serialize every entry as a JSON array, oldest first
    pub async fn export(&self) -> Result<Vec<u8>, ContextError> {
        let state = self.inner.state.read().await;
        let mut stored: Vec<&StoredEntry> = state.entries.values().collect();
        stored.sort_by_key(|stored| (stored.entry.timestamp, stored.seq));
        let entries: Vec<&ContextEntry> = stored.into_iter().map(|stored| &stored.entry).collect();
        Ok(serde_json::to_vec(&entries)?)
    }

    /// Replace the whole store with a snapshot produced by [`ContextStore::export`].
    ///
    /// A snapshot that fails to parse leaves the current contents untouched.
    pub async fn import(&self, data: &[u8]) -> Result<(), ContextError> {
        let entries: Vec<ContextEntry> = serde_json::from_slice(data)?;
        let max = self.inner.config.max_entries_per_type;

        let mut state = self.inner.state.write().await;
        state.clear();
        for entry in entries {
            state.insert(entry);
        }

        let types: Vec<ContextType> = state.type_counts.keys().copied().collect();
        let evicted: usize = types
            .into_iter()
            .map(|context_type| state.enforce_max_entries(context_type, max))
            .sum();

        info!(
            "Imported {} context entries ({} trimmed over capacity)",
            state.entries.len(),
            evicted
        );
        Ok(())
    }

    /// Run one eviction sweep now and return how many entries were removed
    pub async fn evict_expired(&self) -> usize {
        let removed = self.inner.sweep().await;
        if removed > 0 {
            debug!("Context sweep removed {} entries", removed);
        }
        removed
    }

    /// Start the periodic eviction task; a second call while it runs is a no-op
    pub fn start_eviction(&self) {
        let Ok(mut task) = self.eviction_task.lock() else {
            warn!("Context eviction task lock poisoned, not starting");
            return;
        };
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let inner = self.inner.clone();
        let shutdown = self.shutdown.clone();
        let period = inner.config.cleanup_interval();

        *task = Some(tokio::spawn(async move {
            let mut interval_timer = interval(period);
            interval_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            interval_timer.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval_timer.tick() => {
                        let removed = inner.sweep().await;
                        if removed > 0 {
                            debug!("Background context sweep removed {} entries", removed);
                        }
                    }
                }
            }
            debug!("Context eviction task stopped");
        }));
        info!("Context eviction started (every {:?})", period);
    }

    pub fn is_evicting(&self) -> bool {
        self.eviction_task
            .lock()
            .map(|task| task.as_ref().is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }

    /// Stop background eviction. Entries stay readable.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new(ContextStoreConfig::default())
    }
}

impl Drop for ContextStore {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
