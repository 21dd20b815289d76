//! Plugin registry: loaded plugins, their supervisors and metadata.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use chathub_core::AppError;

use crate::api::ApiPermission;
use crate::supervisor::PluginSupervisor;

/// Metadata about a loaded plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Unique plugin identifier.
    pub id: String,
    /// Human-readable plugin name.
    pub name: String,
    /// Plugin version string.
    pub version: String,
    /// API permissions granted by the manifest.
    pub permissions: Vec<ApiPermission>,
    /// When the plugin was loaded.
    pub loaded_at: DateTime<Utc>,
    /// Position in load order.
    pub load_order: u64,
}

/// Registry of all loaded plugins.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    /// Plugin ID → supervisor.
    plugins: RwLock<HashMap<String, Arc<PluginSupervisor>>>,
    /// Plugin ID → metadata.
    metadata: RwLock<HashMap<String, PluginInfo>>,
    /// Next load-order position.
    next_order: AtomicU64,
}

impl PluginRegistry {
    /// Creates a new empty plugin registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin. Fails if the id is already taken.
    pub async fn register(
        &self,
        supervisor: Arc<PluginSupervisor>,
        mut info: PluginInfo,
    ) -> Result<(), AppError> {
        let id = supervisor.plugin_id().to_string();

        let mut plugins = self.plugins.write().await;
        let mut metadata = self.metadata.write().await;

        if plugins.contains_key(&id) {
            return Err(
                AppError::conflict(format!("Plugin '{id}' is already registered"))
                    .at("plugin.registry.register"),
            );
        }

        info.load_order = self.next_order.fetch_add(1, Ordering::SeqCst);
        info!(plugin_id = %id, name = %info.name, version = %info.version, "Registering plugin");

        plugins.insert(id.clone(), supervisor);
        metadata.insert(id, info);

        Ok(())
    }

    /// Unregisters a plugin by ID.
    pub async fn unregister(&self, plugin_id: &str) -> Result<Arc<PluginSupervisor>, AppError> {
        let mut plugins = self.plugins.write().await;
        let mut metadata = self.metadata.write().await;

        let supervisor = plugins.remove(plugin_id).ok_or_else(|| {
            AppError::not_found(format!("Plugin '{plugin_id}' not found"))
                .at("plugin.registry.unregister")
        })?;

        metadata.remove(plugin_id);

        info!(plugin_id = %plugin_id, "Plugin unregistered");

        Ok(supervisor)
    }

    /// Gets a plugin's supervisor by ID.
    pub async fn get(&self, plugin_id: &str) -> Option<Arc<PluginSupervisor>> {
        let plugins = self.plugins.read().await;
        plugins.get(plugin_id).cloned()
    }

    /// Gets a plugin's metadata by ID.
    pub async fn info(&self, plugin_id: &str) -> Option<PluginInfo> {
        let metadata = self.metadata.read().await;
        metadata.get(plugin_id).cloned()
    }

    /// Lists all registered plugin metadata in load order.
    pub async fn list(&self) -> Vec<PluginInfo> {
        let metadata = self.metadata.read().await;
        let mut infos: Vec<PluginInfo> = metadata.values().cloned().collect();
        infos.sort_by_key(|info| info.load_order);
        infos
    }

    /// Returns plugin count.
    pub async fn count(&self) -> usize {
        let plugins = self.plugins.read().await;
        plugins.len()
    }

    /// Checks whether a plugin is registered.
    pub async fn contains(&self, plugin_id: &str) -> bool {
        let plugins = self.plugins.read().await;
        plugins.contains_key(plugin_id)
    }
}
