use crate::llm::{ChatOptions, ChatResponse, LLMError, LLMProvider, Message, ProviderStatus};
use crate::orchestrator::types::*;
use crate::stream::{
    PumpSettings, StreamContext, StreamHandle, StreamId, StreamManager, next_stream_id, pump,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Routes requests to registered providers, streams their output and walks
/// the fallback chain on failure
pub struct Orchestrator {
    state: RwLock<ProviderState>,
    streams: Arc<StreamManager>,
    config: CoreConfig,
    call_limiter: Semaphore,
    shutdown: CancellationToken,
}

/// Provider map, active pointer and fallback chain share one lock so a switch
/// never interleaves with a selection
struct ProviderState {
    providers: BTreeMap<String, ProviderEntry>,
    active: Option<String>,
    fallbacks: Vec<String>,
}

struct ProviderEntry {
    provider: Arc<dyn LLMProvider>,
    registered_at: DateTime<Utc>,
}

impl Orchestrator {
    pub fn new(config: CoreConfig) -> Self {
        let state = ProviderState {
            providers: BTreeMap::new(),
            active: None,
            fallbacks: config.fallback_providers.clone(),
        };

        Self {
            state: RwLock::new(state),
            streams: Arc::new(StreamManager::new()),
            call_limiter: Semaphore::new(config.max_concurrent_calls.max(1) as usize),
            config,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Register a provider after a one-time availability probe.
    ///
    /// The first registered provider becomes active, as does the configured
    /// default provider whenever it registers.
    pub async fn register_provider(
        &self,
        provider: Arc<dyn LLMProvider>,
    ) -> Result<(), OrchestratorError> {
        let name = provider.name().to_string();

        if !provider.is_available().await {
            warn!("Provider {} is not available, skipping registration", name);
            return Err(OrchestratorError::ProviderUnavailable(name));
        }

        let mut state = self.state.write().await;
        let replaced = state
            .providers
            .insert(
                name.clone(),
                ProviderEntry {
                    provider,
                    registered_at: Utc::now(),
                },
            )
            .is_some();

        if state.active.is_none() || name == self.config.default_provider {
            state.active = Some(name.clone());
        }

        if replaced {
            info!("Re-registered provider {}", name);
        } else {
            info!("Registered provider {}", name);
        }
        Ok(())
    }

    pub async fn unregister_provider(&self, name: &str) -> Result<(), OrchestratorError> {
        let mut state = self.state.write().await;
        if state.providers.remove(name).is_none() {
            return Err(OrchestratorError::ProviderNotFound(name.to_string()));
        }
        if state.active.as_deref() == Some(name) {
            state.active = state.providers.keys().next().cloned();
        }
        info!("Unregistered provider {}", name);
        Ok(())
    }

    /// Make `name` the active provider
    pub async fn switch_provider(&self, name: &str) -> Result<(), OrchestratorError> {
        let mut state = self.state.write().await;
        if !state.providers.contains_key(name) {
            return Err(OrchestratorError::ProviderNotFound(name.to_string()));
        }
        state.active = Some(name.to_string());
        info!("Switched active provider to {}", name);
        Ok(())
    }

    pub async fn active_provider(&self) -> Option<String> {
        self.state.read().await.active.clone()
    }

    /// Registered provider names in sorted order
    pub async fn available_providers(&self) -> Vec<String> {
        self.state.read().await.providers.keys().cloned().collect()
    }

    pub async fn provider_statuses(&self) -> Vec<ProviderStatus> {
        let state = self.state.read().await;
        state
            .providers
            .iter()
            .map(|(name, entry)| ProviderStatus {
                name: name.clone(),
                is_available: true,
                registered_at: entry.registered_at,
                supports_streaming: entry.provider.as_streaming().is_some(),
            })
            .collect()
    }

    pub async fn set_fallback_providers(&self, fallbacks: Vec<String>) {
        self.state.write().await.fallbacks = fallbacks;
    }

    pub async fn fallback_providers(&self) -> Vec<String> {
        self.state.read().await.fallbacks.clone()
    }

    /// Route a request. Cancelled when the orchestrator shuts down.
    pub async fn process_request(&self, request: AIRequest) -> Result<AIResponse, OrchestratorError> {
        let cancel = self.shutdown.child_token();
        self.process_request_with_cancel(request, cancel).await
    }

    /// Route a request under an external cancellation signal.
    ///
    /// A streaming request returns as soon as its stream is registered; the
    /// content is read through [`Orchestrator::get_stream`].
    pub async fn process_request_with_cancel(
        &self,
        request: AIRequest,
        cancel: CancellationToken,
    ) -> Result<AIResponse, OrchestratorError> {
        let (name, provider) = self.select_provider(&request).await?;
        debug!("Selected provider {} for request", name);

        if request.stream && self.config.streaming_enabled {
            return Ok(self.start_stream(request, &name, provider, &cancel));
        }

        let start = Instant::now();
        let options = request.chat_options(false);
        match self
            .call_provider(provider.as_ref(), request.messages.clone(), options, &cancel)
            .await
        {
            Ok(response) => Ok(AIResponse::completed(&name, response, start.elapsed())),
            Err(LLMError::Cancelled) => Err(OrchestratorError::Cancelled),
            Err(error) => {
                warn!("Provider {} failed: {}", name, error);
                self.try_fallback(&request, &name, error, &cancel).await
            }
        }
    }

    /// Read-only handle for a stream returned by a streaming request
    pub fn get_stream(&self, stream_id: &str) -> Result<StreamHandle, OrchestratorError> {
        self.streams
            .get_read_handle(stream_id)
            .ok_or_else(|| OrchestratorError::StreamNotFound(stream_id.to_string()))
    }

    pub fn cancel_stream(&self, stream_id: &str) -> Result<(), OrchestratorError> {
        if self.streams.cancel(stream_id) {
            debug!("Cancelled stream {}", stream_id);
            Ok(())
        } else {
            Err(OrchestratorError::StreamNotFound(stream_id.to_string()))
        }
    }

    pub fn active_streams(&self) -> Vec<StreamId> {
        self.streams.ids()
    }

    /// Cancel every in-flight request and stream
    pub fn shutdown(&self) {
        info!("Shutting down orchestrator");
        self.shutdown.cancel();
        self.streams.cancel_all();
        self.call_limiter.close();
    }

    /// Explicit provider, then the active one, then the first registered
    async fn select_provider(
        &self,
        request: &AIRequest,
    ) -> Result<(String, Arc<dyn LLMProvider>), OrchestratorError> {
        let state = self.state.read().await;

        let chosen = request
            .provider
            .as_deref()
            .and_then(|name| state.providers.get_key_value(name))
            .or_else(|| {
                state
                    .active
                    .as_deref()
                    .and_then(|name| state.providers.get_key_value(name))
            })
            .or_else(|| state.providers.iter().next());

        chosen
            .map(|(name, entry)| (name.clone(), entry.provider.clone()))
            .ok_or(OrchestratorError::NoProviderAvailable)
    }

    fn start_stream(
        &self,
        request: AIRequest,
        provider_name: &str,
        provider: Arc<dyn LLMProvider>,
        cancel: &CancellationToken,
    ) -> AIResponse {
        let stream_id = next_stream_id();
        let (context, writer) = StreamContext::open(
            stream_id.clone(),
            provider_name,
            self.config.stream_buffer_size,
            cancel,
        );
        self.streams.add(stream_id.clone(), context);

        let has_thoughts = request.enable_thoughts && self.config.reasoning_enabled;
        let settings = PumpSettings {
            chunk_delay: self.config.simulated_chunk_delay(),
            timeout: self.config.request_timeout(),
            reasoning_enabled: self.config.reasoning_enabled,
        };
        let options = request.chat_options(true);
        let streams = self.streams.clone();
        let id = stream_id.clone();

        tokio::spawn(async move {
            let outcome = pump(provider, request.messages, options, writer, settings).await;
            streams.remove(&id);
            debug!("Stream {} closed: {:?}", id, outcome);
        });

        info!("Opened stream {} on provider {}", stream_id, provider_name);
        AIResponse::streaming(provider_name, stream_id, has_thoughts)
    }

    /// One bounded, cancellable provider call
    async fn call_provider(
        &self,
        provider: &dyn LLMProvider,
        messages: Vec<Message>,
        options: ChatOptions,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, LLMError> {
        let timeout = self.config.request_timeout();
        let call = async {
            let _permit = self.call_limiter.acquire().await.map_err(|_| {
                LLMError::ProviderUnavailable("orchestrator is shut down".to_string())
            })?;
            match tokio::time::timeout(timeout, provider.chat(messages, options)).await {
                Ok(result) => result,
                Err(_) => Err(LLMError::Timeout(timeout)),
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LLMError::Cancelled),
            result = call => result,
        }
    }

    /// Retry on each configured fallback in order, skipping the provider that
    /// just failed and names that are not registered
    async fn try_fallback(
        &self,
        request: &AIRequest,
        failed: &str,
        original: LLMError,
        cancel: &CancellationToken,
    ) -> Result<AIResponse, OrchestratorError> {
        let candidates: Vec<(String, Arc<dyn LLMProvider>)> = {
            let state = self.state.read().await;
            state
                .fallbacks
                .iter()
                .filter(|name| name.as_str() != failed)
                .filter_map(|name| {
                    state
                        .providers
                        .get(name)
                        .map(|entry| (name.clone(), entry.provider.clone()))
                })
                .collect()
        };

        let mut attempted = Vec::with_capacity(candidates.len());
        for (name, provider) in candidates {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }
            attempted.push(name.clone());

            let start = Instant::now();
            let options = request.chat_options(false);
            match self
                .call_provider(provider.as_ref(), request.messages.clone(), options, cancel)
                .await
            {
                Ok(response) => {
                    info!("Fallback provider {} answered after {} failed", name, failed);
                    let mut response = AIResponse::completed(&name, response, start.elapsed());
                    response
                        .metadata
                        .insert(FALLBACK_FROM_KEY.to_string(), serde_json::json!(failed));
                    response.metadata.insert(
                        ORIGINAL_ERROR_KEY.to_string(),
                        serde_json::json!(original.to_string()),
                    );
                    return Ok(response);
                }
                Err(LLMError::Cancelled) => return Err(OrchestratorError::Cancelled),
                Err(error) => warn!("Fallback provider {} failed: {}", name, error),
            }
        }

        warn!(
            "All providers failed for request originally sent to {} (tried {:?})",
            failed, attempted
        );
        Err(OrchestratorError::AllProvidersFailed {
            provider: failed.to_string(),
            source: original,
            attempted,
        })
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
