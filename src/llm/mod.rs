pub mod provider;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use provider::{ChunkSink, LLMProvider, StreamingProvider};
pub use types::*;
