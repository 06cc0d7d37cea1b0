//! # Kernel Integration
//!
//! Combines the subsystems into one [`Kernel`] with a shared lifecycle.
//!
//! ```text
//! ┌───────────────────────────────────────────────────┐
//! │                      Kernel                       │
//! │  ┌──────────────┐ ┌──────────────┐ ┌────────────┐ │
//! │  │ Orchestrator │ │  Capability  │ │  Runtime   │ │
//! │  │  + Streams   │ │   Registry   │ │ + Context  │ │
//! │  └──────────────┘ └──────────────┘ └────────────┘ │
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! Capabilities are installed as trait objects, initialized in dependency
//! order by [`Kernel::load_capabilities`] and shut down in reverse order by
//! [`Kernel::unload_capabilities`]. Every transition is announced on the
//! runtime's event bus.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use nero::{AIRequest, Kernel, KernelConfig, Message};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let kernel = Kernel::new(KernelConfig::default());
//!     kernel.start()?;
//!
//!     // Providers are supplied by the embedding application
//!     // kernel.register_provider(Arc::new(MyProvider::new())).await?;
//!
//!     let report = kernel.load_capabilities().await?;
//!     println!("Loaded capabilities: {:?}", report.loaded);
//!
//!     let response = kernel
//!         .process_request(AIRequest::new(vec![Message::user("hello")]))
//!         .await?;
//!     println!("{}", response.content);
//!
//!     kernel.shutdown().await?;
//!     Ok(())
//! }
//! ```

use crate::config::{ConfigDiscovery, KernelConfig};
use crate::llm::LLMProvider;
use crate::orchestrator::{AIRequest, AIResponse, Orchestrator, OrchestratorError};
use crate::registry::{
    Capability, CapabilityInfo, CapabilityRegistry, CapabilityStatus, RegistryError,
};
use crate::runtime::{Event, EventType, Runtime, RuntimeStats};
use crate::stream::StreamHandle;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const KERNEL_SOURCE: &str = "kernel";

/// The assembled runtime kernel
pub struct Kernel {
    config: KernelConfig,
    orchestrator: Arc<Orchestrator>,
    registry: Arc<CapabilityRegistry>,
    runtime: Arc<Runtime>,
    instances: RwLock<HashMap<String, Arc<dyn Capability>>>,
}

/// Outcome of a [`Kernel::load_capabilities`] pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadReport {
    /// Newly loaded, in load order
    pub loaded: Vec<String>,
    /// Capability name and the reason it ended in the error state
    pub failed: Vec<(String, String)>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelStatus {
    pub is_running: bool,
    pub active_provider: Option<String>,
    pub providers: Vec<String>,
    pub active_streams: usize,
    pub capabilities: HashMap<CapabilityStatus, usize>,
    pub context_entries: usize,
    pub runtime: RuntimeStats,
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Self {
        let orchestrator = Arc::new(Orchestrator::new(config.core.clone()));
        let runtime = Arc::new(Runtime::new(
            config.runtime.clone(),
            config.context.clone(),
        ));

        Self {
            config,
            orchestrator,
            registry: Arc::new(CapabilityRegistry::new()),
            runtime,
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Build a kernel from the first configuration file found on disk
    pub fn from_discovered_config() -> Result<Self> {
        let config =
            ConfigDiscovery::discover_config().context("Failed to load kernel configuration")?;
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Start the event loop and background context eviction
    pub fn start(&self) -> Result<()> {
        self.runtime.start().context("Failed to start runtime")?;
        self.runtime
            .emit(Event::new(EventType::System, KERNEL_SOURCE).with_data("state", json!("started")));
        info!("Kernel started");
        Ok(())
    }

    /// Unload capabilities, cancel in-flight requests and streams, then stop the runtime
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down kernel...");

        let unloaded = self.unload_capabilities().await?;
        debug!("Unloaded {} capabilities during shutdown", unloaded.len());

        self.orchestrator.shutdown();
        self.runtime.emit(
            Event::new(EventType::System, KERNEL_SOURCE).with_data("state", json!("stopping")),
        );
        self.runtime.stop().await;

        info!("Kernel shutdown complete");
        Ok(())
    }

    pub async fn register_provider(
        &self,
        provider: Arc<dyn LLMProvider>,
    ) -> Result<(), OrchestratorError> {
        self.orchestrator.register_provider(provider).await
    }

    pub async fn process_request(&self, request: AIRequest) -> Result<AIResponse, OrchestratorError> {
        self.orchestrator.process_request(request).await
    }

    pub fn get_stream(&self, stream_id: &str) -> Result<StreamHandle, OrchestratorError> {
        self.orchestrator.get_stream(stream_id)
    }

    /// Register a capability and keep its instance for loading
    pub async fn install_capability(&self, capability: Arc<dyn Capability>) -> Result<(), RegistryError> {
        let info = CapabilityInfo::from_capability(capability.as_ref());
        let name = info.name.clone();

        self.registry.register(info).await?;
        self.instances.write().await.insert(name.clone(), capability);
        info!("Installed capability {}", name);
        Ok(())
    }

    /// Initialize every capability that is not loaded yet, dependencies first.
    ///
    /// A capability whose initialization fails, or whose dependencies are not
    /// loaded, is marked [`CapabilityStatus::Error`] and the pass continues.
    /// Registry entries without an installed instance have nothing to
    /// initialize and are marked loaded directly.
    pub async fn load_capabilities(&self) -> Result<LoadReport> {
        let order = self
            .registry
            .resolve_dependencies()
            .await
            .context("Failed to resolve capability load order")?;

        let mut report = LoadReport::default();
        for name in order {
            let Some(info) = self.registry.get(&name).await else {
                continue;
            };
            if info.status == CapabilityStatus::Loaded {
                continue;
            }

            if let Some(reason) = self.unmet_dependency(&info).await {
                warn!("Not loading capability {}: {}", name, reason);
                self.registry.set_status(&name, CapabilityStatus::Error).await?;
                self.announce(EventType::CapabilityLoad, &info, Some(reason.as_str()));
                report.failed.push((name, reason));
                continue;
            }

            self.registry.set_status(&name, CapabilityStatus::Loading).await?;
            let instance = self.instances.read().await.get(&name).cloned();

            let outcome = match instance {
                Some(capability) => capability.initialize(&self.runtime).await,
                None => Ok(()),
            };

            match outcome {
                Ok(()) => {
                    self.registry.set_status(&name, CapabilityStatus::Loaded).await?;
                    info!("Loaded capability {} v{}", name, info.version);
                    self.announce(EventType::CapabilityLoad, &info, None);
                    report.loaded.push(name);
                }
                Err(e) => {
                    let reason = format!("{:#}", e);
                    warn!("Capability {} failed to initialize: {}", name, reason);
                    self.registry.set_status(&name, CapabilityStatus::Error).await?;
                    self.announce(EventType::CapabilityLoad, &info, Some(reason.as_str()));
                    report.failed.push((name, reason));
                }
            }
        }

        Ok(report)
    }

    /// Shut down every loaded capability, dependents first; returns those unloaded
    pub async fn unload_capabilities(&self) -> Result<Vec<String>> {
        let order = self
            .registry
            .unload_order()
            .await
            .context("Failed to resolve capability unload order")?;

        let mut unloaded = Vec::new();
        for name in order {
            let Some(info) = self.registry.get(&name).await else {
                continue;
            };
            if info.status != CapabilityStatus::Loaded {
                continue;
            }

            let instance = self.instances.read().await.get(&name).cloned();
            let outcome = match instance {
                Some(capability) => capability.shutdown().await,
                None => Ok(()),
            };

            match outcome {
                Ok(()) => {
                    self.registry.set_status(&name, CapabilityStatus::Unloaded).await?;
                    info!("Unloaded capability {}", name);
                    self.announce(EventType::CapabilityUnload, &info, None);
                    unloaded.push(name);
                }
                Err(e) => {
                    let reason = format!("{:#}", e);
                    warn!("Capability {} failed to shut down: {}", name, reason);
                    self.registry.set_status(&name, CapabilityStatus::Error).await?;
                    self.announce(EventType::CapabilityUnload, &info, Some(reason.as_str()));
                }
            }
        }

        Ok(unloaded)
    }

    pub async fn get_status(&self) -> KernelStatus {
        KernelStatus {
            is_running: self.runtime.is_running(),
            active_provider: self.orchestrator.active_provider().await,
            providers: self.orchestrator.available_providers().await,
            active_streams: self.orchestrator.active_streams().len(),
            capabilities: self.registry.status_summary().await,
            context_entries: self.runtime.context().len().await,
            runtime: self.runtime.stats(),
        }
    }

    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        self.orchestrator.clone()
    }

    pub fn registry(&self) -> Arc<CapabilityRegistry> {
        self.registry.clone()
    }

    pub fn runtime(&self) -> Arc<Runtime> {
        self.runtime.clone()
    }

    /// Reason `info` cannot load yet, if any
    async fn unmet_dependency(&self, info: &CapabilityInfo) -> Option<String> {
        for dep in &info.dependencies {
            match self.registry.get(dep).await {
                None => return Some(format!("dependency {} is not registered", dep)),
                Some(dep_info) if dep_info.status != CapabilityStatus::Loaded => {
                    return Some(format!("dependency {} is {:?}", dep, dep_info.status));
                }
                Some(_) => {}
            }
        }
        None
    }

    fn announce(&self, event_type: EventType, info: &CapabilityInfo, error: Option<&str>) {
        let mut event = Event::new(event_type, KERNEL_SOURCE)
            .with_target(info.name.clone())
            .with_data("name", json!(info.name))
            .with_data("version", json!(info.version));
        event = match error {
            Some(error) => event
                .with_data("status", json!("error"))
                .with_data("error", json!(error)),
            None => event.with_data("status", json!("ok")),
        };
        self.runtime.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::ScriptedProvider;
    use crate::llm::Message;
    use std::sync::Mutex;

    /// Records lifecycle calls into a shared journal
    struct JournalCapability {
        name: String,
        dependencies: Vec<String>,
        fail_init: bool,
        journal: Arc<Mutex<Vec<String>>>,
    }

    impl JournalCapability {
        fn new(name: &str, deps: &[&str], journal: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                dependencies: deps.iter().map(|d| d.to_string()).collect(),
                fail_init: false,
                journal: journal.clone(),
            })
        }

        fn failing(name: &str, journal: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                dependencies: Vec::new(),
                fail_init: true,
                journal: journal.clone(),
            })
        }
    }

    #[async_trait::async_trait]
    impl Capability for JournalCapability {
        fn name(&self) -> &str {
            &self.name
        }

        fn version(&self) -> &str {
            "0.1.0"
        }

        fn dependencies(&self) -> Vec<String> {
            self.dependencies.clone()
        }

        async fn initialize(&self, _runtime: &Runtime) -> anyhow::Result<()> {
            if self.fail_init {
                anyhow::bail!("{} could not open its device", self.name);
            }
            self.journal.lock().unwrap().push(format!("init {}", self.name));
            Ok(())
        }

        async fn shutdown(&self) -> anyhow::Result<()> {
            self.journal.lock().unwrap().push(format!("shutdown {}", self.name));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_load_and_unload_follow_dependency_order() {
        let kernel = Kernel::new(KernelConfig::default());
        let journal = Arc::new(Mutex::new(Vec::new()));

        kernel
            .install_capability(JournalCapability::new("screen", &["vision"], &journal))
            .await
            .unwrap();
        kernel
            .install_capability(JournalCapability::new("vision", &["inference"], &journal))
            .await
            .unwrap();
        kernel
            .install_capability(JournalCapability::new("inference", &[], &journal))
            .await
            .unwrap();
        kernel.start().unwrap();

        let report = kernel.load_capabilities().await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.loaded, vec!["inference", "vision", "screen"]);

        // A second pass has nothing left to do
        assert!(kernel.load_capabilities().await.unwrap().loaded.is_empty());

        let unloaded = kernel.unload_capabilities().await.unwrap();
        assert_eq!(unloaded, vec!["screen", "vision", "inference"]);

        assert_eq!(
            *journal.lock().unwrap(),
            vec![
                "init inference",
                "init vision",
                "init screen",
                "shutdown screen",
                "shutdown vision",
                "shutdown inference",
            ]
        );

        kernel.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_dependency_marks_dependents_as_error() {
        let kernel = Kernel::new(KernelConfig::default());
        let journal = Arc::new(Mutex::new(Vec::new()));

        kernel
            .install_capability(JournalCapability::failing("audio", &journal))
            .await
            .unwrap();
        kernel
            .install_capability(JournalCapability::new("speech", &["audio"], &journal))
            .await
            .unwrap();
        kernel
            .install_capability(JournalCapability::new("keybinds", &[], &journal))
            .await
            .unwrap();

        let report = kernel.load_capabilities().await.unwrap();
        assert_eq!(report.loaded, vec!["keybinds"]);
        assert_eq!(report.failed.len(), 2);
        assert!(report.failed[0].1.contains("could not open its device"));

        let registry = kernel.registry();
        assert_eq!(registry.get("audio").await.unwrap().status, CapabilityStatus::Error);
        assert_eq!(registry.get("speech").await.unwrap().status, CapabilityStatus::Error);
        assert_eq!(journal.lock().unwrap().as_slice(), ["init keybinds"]);
    }

    #[tokio::test]
    async fn test_install_rejects_cycle() {
        let kernel = Kernel::new(KernelConfig::default());
        let journal = Arc::new(Mutex::new(Vec::new()));

        kernel
            .install_capability(JournalCapability::new("X", &["Y"], &journal))
            .await
            .unwrap();
        let result = kernel
            .install_capability(JournalCapability::new("Y", &["X"], &journal))
            .await;

        assert!(matches!(result, Err(RegistryError::CircularDependency(_))));
        assert_eq!(kernel.registry().len().await, 1);
    }

    #[tokio::test]
    async fn test_capability_events_reach_subscribers() {
        let kernel = Kernel::new(KernelConfig::default());
        let journal = Arc::new(Mutex::new(Vec::new()));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        kernel
            .runtime()
            .subscribe(EventType::CapabilityLoad, move |event: Event| {
                let tx = tx.clone();
                async move {
                    tx.send(event)?;
                    anyhow::Ok(())
                }
            })
            .await;
        kernel
            .install_capability(JournalCapability::new("haptic", &[], &journal))
            .await
            .unwrap();
        kernel.start().unwrap();
        kernel.load_capabilities().await.unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.target.as_deref(), Some("haptic"));
        assert_eq!(event.data["status"], "ok");

        kernel.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_status_and_request_delegation() {
        let kernel = Kernel::new(KernelConfig::default());
        kernel
            .register_provider(Arc::new(ScriptedProvider::replying("ollama", "pong")))
            .await
            .unwrap();
        kernel.start().unwrap();

        let response = kernel
            .process_request(AIRequest::new(vec![Message::user("ping")]))
            .await
            .unwrap();
        assert_eq!(response.content, "pong");

        let status = kernel.get_status().await;
        assert!(status.is_running);
        assert_eq!(status.active_provider.as_deref(), Some("ollama"));
        assert_eq!(status.providers, vec!["ollama"]);

        kernel.shutdown().await.unwrap();
        assert!(!kernel.get_status().await.is_running);
    }
}
