//! Plugin configuration store and synchronizer.
//!
//! The server owns the canonical configuration blob of each plugin. Every
//! replacement bumps the blob's revision and is queued for delivery through
//! `OnConfigurationChange`. Each plugin has its own FIFO queue drained by a
//! single worker, so deliveries to one plugin never overlap or reorder, and
//! a slow plugin never holds up another plugin's deliveries.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::hooks::{ConfigurationChangeArgs, HookDispatcher, HookName};
use crate::rpc::RpcError;

/// One revision of a plugin's configuration blob.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredConfig {
    /// Monotonic per-plugin revision, starting at 1.
    pub revision: u64,
    /// The blob.
    pub config: Value,
}

/// Canonical configuration blobs, keyed by plugin id.
#[derive(Debug, Default)]
pub struct PluginConfigStore {
    blobs: DashMap<String, StoredConfig>,
}

impl PluginConfigStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current blob of a plugin.
    pub fn get(&self, plugin_id: &str) -> Option<StoredConfig> {
        self.blobs.get(plugin_id).map(|entry| entry.value().clone())
    }

    /// Seeds a plugin's blob if it has none yet. Returns the current blob.
    pub fn seed(&self, plugin_id: &str, config: Value) -> StoredConfig {
        self.blobs
            .entry(plugin_id.to_string())
            .or_insert(StoredConfig {
                revision: 1,
                config,
            })
            .value()
            .clone()
    }

    /// Replaces a plugin's blob and returns the new revision.
    pub fn replace(&self, plugin_id: &str, config: Value) -> u64 {
        let mut entry = self
            .blobs
            .entry(plugin_id.to_string())
            .or_insert(StoredConfig {
                revision: 0,
                config: Value::Null,
            });
        entry.revision += 1;
        entry.config = config;
        entry.revision
    }

    /// Forgets a plugin's blob.
    pub fn remove(&self, plugin_id: &str) -> Option<StoredConfig> {
        self.blobs.remove(plugin_id).map(|(_, stored)| stored)
    }
}

struct DeliveryJob {
    revision: u64,
    config: Value,
    done: oneshot::Sender<Result<(), RpcError>>,
}

/// Handle to one queued configuration delivery.
#[derive(Debug)]
pub struct ConfigDelivery {
    /// Revision being delivered.
    pub revision: u64,
    plugin_id: String,
    rx: oneshot::Receiver<Result<(), RpcError>>,
}

impl ConfigDelivery {
    /// Waits for the plugin to acknowledge (or fail) this revision.
    pub async fn delivered(self) -> Result<(), RpcError> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(RpcError::NotRunning(self.plugin_id)))
    }
}

/// Pushes configuration changes to plugins, in order, exactly once each.
#[derive(Debug)]
pub struct ConfigSynchronizer {
    store: Arc<PluginConfigStore>,
    dispatcher: Arc<HookDispatcher>,
    queues: DashMap<String, mpsc::UnboundedSender<DeliveryJob>>,
}

impl ConfigSynchronizer {
    /// Creates a synchronizer over the given store.
    pub fn new(store: Arc<PluginConfigStore>, dispatcher: Arc<HookDispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            queues: DashMap::new(),
        }
    }

    /// The canonical store.
    pub fn store(&self) -> &Arc<PluginConfigStore> {
        &self.store
    }

    /// Replaces a plugin's configuration and queues its delivery.
    ///
    /// Updates to the same plugin are delivered in call order. Must be
    /// called from within a tokio runtime.
    pub fn update(&self, plugin_id: &str, config: Value) -> ConfigDelivery {
        let (done, rx) = oneshot::channel();

        // The queue entry stays locked across the store write and the send
        // so revisions enter the queue in the order they were assigned.
        let mut queue = self
            .queues
            .entry(plugin_id.to_string())
            .or_insert_with(|| self.spawn_worker(plugin_id));
        if queue.is_closed() {
            *queue = self.spawn_worker(plugin_id);
        }

        let revision = self.store.replace(plugin_id, config.clone());
        let job = DeliveryJob {
            revision,
            config,
            done,
        };
        if let Err(mpsc::error::SendError(job)) = queue.send(job) {
            let _ = job.done.send(Err(RpcError::NotRunning(plugin_id.to_string())));
        }

        debug!(plugin_id = %plugin_id, revision, "Configuration change queued");

        ConfigDelivery {
            revision,
            plugin_id: plugin_id.to_string(),
            rx,
        }
    }

    /// Drops a plugin's delivery queue. Already queued changes are still
    /// attempted; the stored blob is kept.
    pub fn remove_plugin(&self, plugin_id: &str) {
        self.queues.remove(plugin_id);
    }

    fn spawn_worker(&self, plugin_id: &str) -> mpsc::UnboundedSender<DeliveryJob> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(delivery_loop(
            plugin_id.to_string(),
            Arc::clone(&self.dispatcher),
            rx,
        ));
        tx
    }
}

async fn delivery_loop(
    plugin_id: String,
    dispatcher: Arc<HookDispatcher>,
    mut rx: mpsc::UnboundedReceiver<DeliveryJob>,
) {
    while let Some(job) = rx.recv().await {
        let args = ConfigurationChangeArgs {
            revision: job.revision,
            config: job.config,
        };
        let outcome = match serde_json::to_value(&args) {
            Ok(args) => dispatcher
                .invoke(&plugin_id, HookName::OnConfigurationChange, args)
                .await
                .map(|_| ()),
            Err(err) => Err(RpcError::App(err.into())),
        };

        match &outcome {
            Ok(()) => info!(
                plugin_id = %plugin_id,
                revision = job.revision,
                "Configuration delivered"
            ),
            Err(err) => warn!(
                plugin_id = %plugin_id,
                revision = job.revision,
                error = %err,
                "Configuration delivery failed"
            ),
        }
        let _ = job.done.send(outcome);
    }
    debug!(plugin_id = %plugin_id, "Configuration queue closed");
}
