use crate::registry::types::*;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Visitation state for the topological sort
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Named capabilities and their declared dependencies.
///
/// The dependency relation is kept acyclic: a registration that would close
/// a cycle is rejected before the map is touched.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    capabilities: RwLock<HashMap<String, CapabilityInfo>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a capability entry
    pub async fn register(&self, info: CapabilityInfo) -> Result<(), RegistryError> {
        let mut capabilities = self.capabilities.write().await;

        if has_circular_dependency(&capabilities, &info.name, &info.dependencies) {
            warn!(
                "Rejected capability {}: dependencies {:?} close a cycle",
                info.name, info.dependencies
            );
            return Err(RegistryError::CircularDependency(info.name));
        }

        debug!(
            "Registered capability {} v{} (depends on {:?})",
            info.name, info.version, info.dependencies
        );
        capabilities.insert(info.name.clone(), info);
        Ok(())
    }

    /// Remove a capability unless a loaded capability still depends on it
    pub async fn unregister(&self, name: &str) -> Result<CapabilityInfo, RegistryError> {
        let mut capabilities = self.capabilities.write().await;

        if !capabilities.contains_key(name) {
            return Err(RegistryError::NotFound(name.to_string()));
        }

        let loaded_dependent = capabilities.values().find(|info| {
            info.name != name
                && info.status == CapabilityStatus::Loaded
                && info.dependencies.iter().any(|dep| dep == name)
        });
        if let Some(dependent) = loaded_dependent {
            return Err(RegistryError::HasDependents {
                name: name.to_string(),
                dependent: dependent.name.clone(),
            });
        }

        let removed = capabilities
            .remove(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        info!("Unregistered capability {}", name);
        Ok(removed)
    }

    pub async fn get(&self, name: &str) -> Option<CapabilityInfo> {
        self.capabilities.read().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.capabilities.read().await.contains_key(name)
    }

    /// All entries, sorted by name
    pub async fn list(&self) -> Vec<CapabilityInfo> {
        let mut entries: Vec<_> = self.capabilities.read().await.values().cloned().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    pub async fn len(&self) -> usize {
        self.capabilities.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.capabilities.read().await.is_empty()
    }

    pub async fn set_status(
        &self,
        name: &str,
        status: CapabilityStatus,
    ) -> Result<(), RegistryError> {
        let mut capabilities = self.capabilities.write().await;
        let info = capabilities
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        debug!("Capability {} status {:?} -> {:?}", name, info.status, status);
        info.status = status;
        Ok(())
    }

    /// Every registered name, each after all of its registered dependencies.
    ///
    /// Dependencies that are not registered are left out of the order.
    pub async fn resolve_dependencies(&self) -> Result<Vec<String>, RegistryError> {
        let capabilities = self.capabilities.read().await;

        let mut names: Vec<&String> = capabilities.keys().collect();
        names.sort();

        let mut marks = HashMap::new();
        let mut order = Vec::with_capacity(capabilities.len());
        for name in names {
            visit(&capabilities, name, &mut marks, &mut order)?;
        }
        Ok(order)
    }

    /// `target` and its transitive dependencies in load order
    pub async fn load_order_for(&self, target: &str) -> Result<Vec<String>, RegistryError> {
        let capabilities = self.capabilities.read().await;
        if !capabilities.contains_key(target) {
            return Err(RegistryError::NotFound(target.to_string()));
        }

        let mut marks = HashMap::new();
        let mut order = Vec::new();
        visit(&capabilities, target, &mut marks, &mut order)?;
        Ok(order)
    }

    /// Dependents first, so nothing is shut down while something still uses it
    pub async fn unload_order(&self) -> Result<Vec<String>, RegistryError> {
        let mut order = self.resolve_dependencies().await?;
        order.reverse();
        Ok(order)
    }

    /// Direct dependents of `name`, sorted
    pub async fn dependents(&self, name: &str) -> Vec<String> {
        let capabilities = self.capabilities.read().await;
        let mut dependents: Vec<String> = capabilities
            .values()
            .filter(|info| info.dependencies.iter().any(|dep| dep == name))
            .map(|info| info.name.clone())
            .collect();
        dependents.sort();
        dependents
    }

    /// Declared dependencies that are not registered, keyed by the declaring capability
    pub async fn missing_dependencies(&self) -> HashMap<String, Vec<String>> {
        let capabilities = self.capabilities.read().await;
        capabilities
            .values()
            .filter_map(|info| {
                let missing: Vec<String> = info
                    .dependencies
                    .iter()
                    .filter(|dep| !capabilities.contains_key(dep.as_str()))
                    .cloned()
                    .collect();
                (!missing.is_empty()).then(|| (info.name.clone(), missing))
            })
            .collect()
    }

    pub async fn status_summary(&self) -> HashMap<CapabilityStatus, usize> {
        let capabilities = self.capabilities.read().await;
        let mut summary = HashMap::new();
        for info in capabilities.values() {
            *summary.entry(info.status).or_insert(0) += 1;
        }
        summary
    }
}

/// Whether adding `name` with `dependencies` lets the existing graph lead back to `name`
fn has_circular_dependency(
    capabilities: &HashMap<String, CapabilityInfo>,
    name: &str,
    dependencies: &[String],
) -> bool {
    let mut visited = HashSet::new();
    dependencies
        .iter()
        .any(|dep| has_circular_dependency_helper(capabilities, name, dep, &mut visited))
}

fn has_circular_dependency_helper<'a>(
    capabilities: &'a HashMap<String, CapabilityInfo>,
    name: &str,
    current: &'a str,
    visited: &mut HashSet<&'a str>,
) -> bool {
    if current == name {
        return true;
    }
    if !visited.insert(current) {
        return false;
    }

    capabilities.get(current).is_some_and(|info| {
        info.dependencies
            .iter()
            .any(|dep| has_circular_dependency_helper(capabilities, name, dep, visited))
    })
}

/// Depth-first post-order visit; meeting an in-progress node again is a cycle
fn visit<'a>(
    capabilities: &'a HashMap<String, CapabilityInfo>,
    name: &'a str,
    marks: &mut HashMap<&'a str, Mark>,
    order: &mut Vec<String>,
) -> Result<(), RegistryError> {
    match marks.get(name) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::InProgress) => {
            return Err(RegistryError::CircularDependency(name.to_string()));
        }
        None => {}
    }

    let Some(info) = capabilities.get(name) else {
        warn!("Skipping unregistered dependency {}", name);
        marks.insert(name, Mark::Done);
        return Ok(());
    };

    marks.insert(name, Mark::InProgress);
    for dep in &info.dependencies {
        visit(capabilities, dep, marks, order)?;
    }
    marks.insert(name, Mark::Done);
    order.push(name.to_string());
    Ok(())
}
