pub mod graph;
pub mod types;


pub use graph::CapabilityRegistry;
pub use types::*;
