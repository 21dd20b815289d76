//! Plugin manager: lifecycle management for all plugins.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use chathub_core::config::PluginConfig;
use chathub_core::einterfaces::Enterprise;
use chathub_core::{AppError, AppResult};
use chathub_entity::Post;

use crate::api::{ApiBridge, PluginGrant, UserService};
use crate::config_sync::{ConfigDelivery, ConfigSynchronizer, PluginConfigStore};
use crate::hooks::{
    BroadcastResult, ContentDispatchResult, HookContext, HookDispatcher, HookName, HookRegistry,
};
use crate::manifest::{PluginManifest, discover_manifests};
use crate::registry::{PluginInfo, PluginRegistry};
use crate::supervisor::{PluginLauncher, PluginStatus, PluginSupervisor};

/// Manages the full lifecycle of plugins: load, activate, configure,
/// deactivate, unload.
pub struct PluginManager {
    /// Plugin system settings.
    config: PluginConfig,
    /// Starts plugin processes.
    launcher: Arc<dyn PluginLauncher>,
    /// Plugin registry.
    plugin_registry: Arc<PluginRegistry>,
    /// Hook registry.
    hook_registry: Arc<HookRegistry>,
    /// Hook dispatcher.
    hook_dispatcher: Arc<HookDispatcher>,
    /// Server API exposed to plugins.
    api: Arc<ApiBridge>,
    /// Configuration delivery.
    config_sync: ConfigSynchronizer,
    /// Whether plugin stderr is re-emitted in the server log.
    forward_stderr: bool,
}

impl PluginManager {
    /// Creates a new plugin manager.
    pub fn new(
        config: PluginConfig,
        launcher: Arc<dyn PluginLauncher>,
        users: Arc<dyn UserService>,
        enterprise: Enterprise,
    ) -> Self {
        let hook_registry = Arc::new(HookRegistry::new());
        let plugin_registry = Arc::new(PluginRegistry::new());
        let hook_dispatcher = Arc::new(HookDispatcher::new(
            hook_registry.clone(),
            plugin_registry.clone(),
            config.hooks.clone(),
        ));
        let config_store = Arc::new(PluginConfigStore::new());
        let api = Arc::new(ApiBridge::new(users, config_store.clone(), enterprise));
        let config_sync = ConfigSynchronizer::new(config_store, hook_dispatcher.clone());

        Self {
            config,
            launcher,
            plugin_registry,
            hook_registry,
            hook_dispatcher,
            api,
            config_sync,
            forward_stderr: true,
        }
    }

    /// Sets whether plugin stderr is forwarded into the server log.
    pub fn with_stderr_forwarding(mut self, forward: bool) -> Self {
        self.forward_stderr = forward;
        self
    }

    /// Starts a plugin and registers its hooks.
    ///
    /// If the plugin cannot be brought up (including an `OnActivate` that
    /// returns an error) it is unloaded again and the error returned.
    pub async fn load_plugin(&self, manifest: PluginManifest) -> AppResult<()> {
        let plugin_id = manifest.id.clone();
        if self.plugin_registry.contains(&plugin_id).await {
            return Err(
                AppError::conflict(format!("Plugin '{plugin_id}' is already loaded"))
                    .at("plugin.manager.load"),
            );
        }

        // Seed
        let settings = manifest.settings.clone().unwrap_or_else(|| json!({}));
        self.config_sync.store().seed(&plugin_id, settings);

        // Supervise
        let handlers = self
            .api
            .handler_table(PluginGrant::new(&plugin_id, &manifest.permissions));
        let mut spec = manifest.to_spec(self.forward_stderr);
        spec.call_timeout = self.config.rpc.call_timeout();
        let supervisor = PluginSupervisor::new(
            spec,
            self.launcher.clone(),
            handlers,
            self.hook_registry.clone(),
            &self.config,
        );

        // Register
        let info = PluginInfo {
            id: plugin_id.clone(),
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            permissions: manifest.permissions.clone(),
            loaded_at: Utc::now(),
            load_order: 0,
        };
        self.plugin_registry
            .register(supervisor.clone(), info)
            .await?;

        // Start
        if let Err(err) = supervisor.start().await {
            error!(plugin_id = %plugin_id, error = %err, "Plugin start failed");
            supervisor.stop().await;
            let _ = self.plugin_registry.unregister(&plugin_id).await;
            self.config_sync.remove_plugin(&plugin_id);
            return Err(err.into());
        }

        let hooks = supervisor.current().map(|h| h.hooks().len()).unwrap_or(0);
        info!(
            plugin_id = %plugin_id,
            name = %manifest.name,
            version = %manifest.version,
            hooks,
            "Plugin loaded and started"
        );

        Ok(())
    }

    /// Deactivates, stops and unloads a plugin.
    pub async fn unload_plugin(&self, plugin_id: &str) -> AppResult<()> {
        let supervisor = self.plugin_registry.get(plugin_id).await.ok_or_else(|| {
            AppError::not_found(format!("Plugin '{plugin_id}' not found"))
                .at("plugin.manager.unload")
        })?;

        // Deactivate
        if let Err(e) = self
            .hook_dispatcher
            .invoke(plugin_id, HookName::OnDeactivate, Value::Null)
            .await
        {
            warn!(
                plugin_id = %plugin_id,
                error = %e,
                "Plugin deactivate returned error"
            );
        }

        self.shutdown(plugin_id, &supervisor).await?;
        info!(plugin_id = %plugin_id, "Plugin unloaded");

        Ok(())
    }

    /// Deactivates, stops and unloads all plugins.
    pub async fn unload_all(&self) -> AppResult<()> {
        let deactivation = self
            .hook_dispatcher
            .broadcast(HookName::OnDeactivate, Value::Null)
            .await;
        for failure in &deactivation.failures {
            warn!(
                plugin_id = %failure.plugin_id,
                error = %failure.error,
                "Plugin deactivate returned error"
            );
        }

        let plugins = self.plugin_registry.list().await;
        let stops = plugins.iter().rev().map(|info| async move {
            match self.plugin_registry.get(&info.id).await {
                Some(supervisor) => self.shutdown(&info.id, &supervisor).await,
                None => Ok(()),
            }
        });
        for (info, result) in plugins.iter().rev().zip(join_all(stops).await) {
            if let Err(e) = result {
                error!(
                    plugin_id = %info.id,
                    error = %e,
                    "Error unloading plugin"
                );
            }
        }

        info!("All plugins unloaded");
        Ok(())
    }

    async fn shutdown(&self, plugin_id: &str, supervisor: &PluginSupervisor) -> AppResult<()> {
        supervisor.stop().await;
        self.config_sync.remove_plugin(plugin_id);
        self.plugin_registry.unregister(plugin_id).await?;
        Ok(())
    }

    /// Loads every valid plugin under `directory`. Returns the ids loaded.
    ///
    /// A plugin that fails to load is logged and skipped.
    pub async fn discover_and_load(&self, directory: &Path) -> AppResult<Vec<String>> {
        let manifests = discover_manifests(directory)?;
        info!(
            path = %directory.display(),
            found = manifests.len(),
            "Discovered plugins"
        );

        let mut loaded = Vec::with_capacity(manifests.len());
        for manifest in manifests {
            let plugin_id = manifest.id.clone();
            match self.load_plugin(manifest).await {
                Ok(()) => loaded.push(plugin_id),
                Err(e) => error!(plugin_id = %plugin_id, error = %e, "Failed to load plugin"),
            }
        }
        Ok(loaded)
    }

    /// Replaces a plugin's configuration and queues `OnConfigurationChange`.
    pub async fn update_configuration(
        &self,
        plugin_id: &str,
        config: Value,
    ) -> AppResult<ConfigDelivery> {
        if !self.plugin_registry.contains(plugin_id).await {
            return Err(
                AppError::not_found(format!("Plugin '{plugin_id}' not found"))
                    .at("plugin.manager.update_configuration"),
            );
        }
        Ok(self.config_sync.update(plugin_id, config))
    }

    /// Supervision status of one plugin.
    pub async fn plugin_status(&self, plugin_id: &str) -> AppResult<PluginStatus> {
        match self.plugin_registry.get(plugin_id).await {
            Some(supervisor) => Ok(supervisor.status().await),
            None => Err(
                AppError::not_found(format!("Plugin '{plugin_id}' not found"))
                    .at("plugin.manager.status"),
            ),
        }
    }

    /// Supervision status of every plugin, in load order.
    pub async fn statuses(&self) -> Vec<PluginStatus> {
        let mut statuses = Vec::new();
        for info in self.plugin_registry.list().await {
            if let Some(supervisor) = self.plugin_registry.get(&info.id).await {
                statuses.push(supervisor.status().await);
            }
        }
        statuses
    }

    /// Runs a new post through `MessageWillBePosted`.
    pub async fn message_will_be_posted(
        &self,
        context: &HookContext,
        post: Post,
    ) -> ContentDispatchResult {
        self.hook_dispatcher.message_will_be_posted(context, post).await
    }

    /// Runs an edited post through `MessageWillBeUpdated`.
    pub async fn message_will_be_updated(
        &self,
        context: &HookContext,
        new_post: Post,
        old_post: &Post,
    ) -> ContentDispatchResult {
        self.hook_dispatcher
            .message_will_be_updated(context, new_post, old_post)
            .await
    }

    /// Notifies plugins that a post was stored.
    pub async fn message_has_been_posted(
        &self,
        context: &HookContext,
        post: &Post,
    ) -> BroadcastResult {
        self.hook_dispatcher
            .message_has_been_posted(context, post)
            .await
    }

    /// Returns the hook dispatcher for firing hooks.
    pub fn dispatcher(&self) -> &Arc<HookDispatcher> {
        &self.hook_dispatcher
    }

    /// Returns the hook registry.
    pub fn hook_registry(&self) -> &Arc<HookRegistry> {
        &self.hook_registry
    }

    /// Returns the plugin registry.
    pub fn plugin_registry(&self) -> &Arc<PluginRegistry> {
        &self.plugin_registry
    }

    /// Returns the canonical plugin configuration store.
    pub fn config_store(&self) -> &Arc<PluginConfigStore> {
        self.config_sync.store()
    }

    /// Returns the plugin system settings.
    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    /// Lists all loaded plugins.
    pub async fn list_plugins(&self) -> Vec<PluginInfo> {
        self.plugin_registry.list().await
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("directory", &self.config.directory)
            .field("plugin_registry", &self.plugin_registry)
            .field("forward_stderr", &self.forward_stderr)
            .finish()
    }
}
