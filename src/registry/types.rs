use crate::runtime::Runtime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle state of a registered capability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityStatus {
    #[default]
    Unloaded,
    Loading,
    Loaded,
    Error,
}

/// Registry entry describing a capability and what it needs loaded first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: Option<String>,
    pub dependencies: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub status: CapabilityStatus,
}

impl CapabilityInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Registry entry for a capability instance
    pub fn from_capability(capability: &dyn Capability) -> Self {
        Self::new(capability.name(), capability.version())
            .with_description(capability.description())
            .with_dependencies(capability.dependencies())
    }
}

/// An extension module the kernel can load and unload
#[async_trait::async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Names of capabilities that must be loaded before this one
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    async fn initialize(&self, runtime: &Runtime) -> anyhow::Result<()>;

    async fn shutdown(&self) -> anyhow::Result<()>;
}

/// Capability registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Circular dependency detected involving {0}")]
    CircularDependency(String),
    #[error("Capability not found: {0}")]
    NotFound(String),
    #[error("Cannot remove {name}: {dependent} depends on it")]
    HasDependents { name: String, dependent: String },
}
