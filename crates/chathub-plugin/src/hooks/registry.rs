//! Hook registry: which plugins implement which hooks, in order.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::definitions::HookName;

/// Per-hook ordered subscriber lists.
///
/// Order is the order in which plugins first declared a hook. A plugin that
/// re-declares the same hooks after a restart keeps its position.
#[derive(Debug, Default)]
pub struct HookRegistry {
    subscribers: RwLock<HashMap<HookName, Vec<String>>>,
}

impl HookRegistry {
    /// Creates a new empty hook registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the capability set a plugin declared at handshake.
    ///
    /// Hooks the plugin no longer declares are dropped; new ones are
    /// appended; existing subscriptions keep their position. Unknown hook
    /// names are logged and ignored. Returns the hooks that were recognised.
    pub async fn register_plugin(&self, plugin_id: &str, declared: &[String]) -> Vec<HookName> {
        let mut hooks = Vec::new();
        for name in declared {
            match name.parse::<HookName>() {
                Ok(hook) if !hooks.contains(&hook) => hooks.push(hook),
                Ok(_) => {}
                Err(_) => warn!(plugin_id = %plugin_id, hook = %name, "Ignoring unknown hook"),
            }
        }

        let mut subscribers = self.subscribers.write().await;
        for hook in HookName::ALL {
            let wanted = hooks.contains(&hook);
            let entries = subscribers.entry(hook).or_default();
            let present = entries.iter().any(|id| id == plugin_id);
            if wanted && !present {
                entries.push(plugin_id.to_string());
                debug!(hook = %hook, plugin_id = %plugin_id, position = entries.len(), "Hook subscribed");
            } else if !wanted && present {
                entries.retain(|id| id != plugin_id);
            }
        }
        subscribers.retain(|_, entries| !entries.is_empty());

        info!(plugin_id = %plugin_id, hooks = hooks.len(), "Plugin hooks registered");
        hooks
    }

    /// Removes every subscription of a plugin.
    pub async fn unregister_plugin(&self, plugin_id: &str) {
        let mut subscribers = self.subscribers.write().await;

        for entries in subscribers.values_mut() {
            entries.retain(|id| id != plugin_id);
        }
        subscribers.retain(|_, entries| !entries.is_empty());

        info!(plugin_id = %plugin_id, "All hooks unregistered for plugin");
    }

    /// Subscribers of `hook`, in dispatch order.
    pub async fn subscribers(&self, hook: HookName) -> Vec<String> {
        let subscribers = self.subscribers.read().await;
        subscribers.get(&hook).cloned().unwrap_or_default()
    }

    /// Whether `plugin_id` implements `hook`.
    pub async fn implements(&self, plugin_id: &str, hook: HookName) -> bool {
        let subscribers = self.subscribers.read().await;
        subscribers
            .get(&hook)
            .is_some_and(|entries| entries.iter().any(|id| id == plugin_id))
    }

    /// Hooks that have at least one subscriber.
    pub async fn registered_hooks(&self) -> Vec<HookName> {
        let subscribers = self.subscribers.read().await;
        subscribers.keys().copied().collect()
    }
}
