//! # Nero
//!
//! A small runtime kernel that sits between a terminal client and a set of
//! interchangeable AI text-generation backends.
//!
//! ## Architecture Overview
//!
//! The kernel consists of several components organized into modules:
//!
//! - **[`llm`]**: Provider contract every backend implements, with optional native streaming
//! - **[`orchestrator`]**: Provider selection, fallback chain and stream pumping
//! - **[`stream`]**: Cancellable, pollable response streams and their registry
//! - **[`registry`]**: Capability registry with dependency-ordered load and unload
//! - **[`context`]**: Bounded, relevance- and TTL-aware contextual memory
//! - **[`runtime`]**: Asynchronous event bus that owns the context store
//! - **[`integration`]**: The [`Kernel`] façade tying everything together
//!
//! ## Features
//!
//! ### Provider Routing
//! - **Selection Policy**: Explicit provider, then the active one, then any registered
//! - **Fallback Chain**: Ordered backup providers consulted after a failure
//! - **Uniform Streaming**: Non-streaming backends are re-segmented into word chunks
//!
//! ### Capabilities
//! - **Cycle Detection**: Registrations that would close a dependency cycle are rejected
//! - **Ordered Lifecycle**: Dependencies load first and unload last
//!
//! ### Contextual Memory
//! - **Per-Type Caps**: Oldest entries evicted eagerly on insert
//! - **Background Eviction**: TTL and low-relevance sweeps on a fixed interval
//! - **Snapshots**: JSON export and destructive import
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nero::{AIRequest, Kernel, KernelConfig, Message};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let kernel = Kernel::new(KernelConfig::default());
//!     kernel.start()?;
//!
//!     let response = kernel
//!         .process_request(AIRequest::new(vec![Message::user("hello")]).streaming())
//!         .await?;
//!
//!     if let Some(stream_id) = &response.stream_id {
//!         let handle = kernel.get_stream(stream_id)?;
//!         while let Some(chunk) = handle.recv().await {
//!             print!("{}", chunk.content);
//!         }
//!     }
//!
//!     kernel.shutdown().await?;
//!     Ok(())
//! }
//! ```

/// Provider-agnostic LLM interface.
///
/// The contract each backend implements, plus the request and response
/// types exchanged with it.
pub mod llm;

/// Response streams.
///
/// Stream contexts, read handles, the stream registry and the pump that
/// fills a stream from a provider.
pub mod stream;

/// Orchestration core.
///
/// Selects a provider per request, applies the fallback policy and drives
/// streaming responses.
pub mod orchestrator;

/// Capability registry with dependency resolution.
pub mod registry;

/// Contextual memory store.
pub mod context;

/// Event bus runtime.
pub mod runtime;

/// Kernel configuration and config file discovery.
pub mod config;

/// High-level kernel façade.
pub mod integration;

/// Environment constants and path utilities.
///
/// Centralizes file names and the reference defaults used throughout
/// the kernel.
pub mod env;

// Re-export LLM abstraction types
pub use llm::{
    ChatOptions, ChatResponse, LLMError, LLMProvider, Message, MessageRole, StreamingProvider,
    TokenUsage,
};

// Re-export stream types
pub use stream::{StreamChunk, StreamError, StreamHandle};

// Re-export orchestration types
pub use orchestrator::{AIRequest, AIResponse, CoreConfig, Orchestrator, OrchestratorError};

// Re-export registry types
pub use registry::{Capability, CapabilityInfo, CapabilityRegistry, CapabilityStatus, RegistryError};

// Re-export context types
pub use context::{ContextEntry, ContextError, ContextStore, ContextStoreConfig, ContextType};

// Re-export runtime types
pub use runtime::{Event, EventHandler, EventType, Runtime, RuntimeConfig, RuntimeStats};

// Re-export configuration and integration types
pub use config::{ConfigDiscovery, KernelConfig};
pub use integration::{Kernel, KernelStatus, LoadReport};
