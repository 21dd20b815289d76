//! Shared test helpers for integration tests.
//!
//! Plugins run in-process: each launch starts a [`PluginRuntime`] on a
//! background task, connected to the server through an in-memory relay.
//! Cutting the relay looks to both sides exactly like the plugin process
//! dying.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use chathub_core::AppResult;
use chathub_core::config::PluginConfig;
use chathub_core::einterfaces::Enterprise;
use chathub_entity::{User, UserRole};
use chathub_plugin::api::ApiPermission;
use chathub_plugin::supervisor::{LaunchedPlugin, PluginLauncher, PluginProcess, PluginSpec};
use chathub_plugin::{InMemoryUserService, PluginManager, PluginManifest};
use chathub_plugin_sdk::{HookTable, PluginRuntime, RuntimeHandle, RuntimeOptions};

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Builds a fresh hook table for every launch of a plugin.
pub type HookFactory = Arc<dyn Fn() -> HookTable + Send + Sync>;

/// Launches registered plugins as in-process runtimes.
#[derive(Default)]
pub struct InProcessLauncher {
    factories: Mutex<HashMap<String, HookFactory>>,
    launches: Mutex<HashMap<String, usize>>,
    kills: Mutex<HashMap<String, CancellationToken>>,
    specs: Mutex<HashMap<String, PluginSpec>>,
}

impl InProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the hooks served by `plugin_id`.
    pub fn register<F>(&self, plugin_id: &str, factory: F)
    where
        F: Fn() -> HookTable + Send + Sync + 'static,
    {
        self.factories
            .lock()
            .unwrap()
            .insert(plugin_id.to_string(), Arc::new(factory));
    }

    /// Number of times `plugin_id` has been launched.
    pub fn launches(&self, plugin_id: &str) -> usize {
        self.launches
            .lock()
            .unwrap()
            .get(plugin_id)
            .copied()
            .unwrap_or(0)
    }

    /// Spec of the latest launch of `plugin_id`.
    pub fn last_spec(&self, plugin_id: &str) -> Option<PluginSpec> {
        self.specs.lock().unwrap().get(plugin_id).cloned()
    }

    /// Kills the latest process of `plugin_id` without any goodbye.
    pub fn crash(&self, plugin_id: &str) {
        if let Some(kill) = self.kills.lock().unwrap().get(plugin_id) {
            kill.cancel();
        }
    }
}

#[async_trait]
impl PluginLauncher for InProcessLauncher {
    async fn launch(&self, spec: &PluginSpec) -> io::Result<LaunchedPlugin> {
        let factory = self
            .factories
            .lock()
            .unwrap()
            .get(&spec.id)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such plugin"))?;
        *self
            .launches
            .lock()
            .unwrap()
            .entry(spec.id.clone())
            .or_default() += 1;
        self.specs
            .lock()
            .unwrap()
            .insert(spec.id.clone(), spec.clone());

        let (server_io, mut relay_server) = tokio::io::duplex(256 * 1024);
        let (mut relay_plugin, plugin_io) = tokio::io::duplex(256 * 1024);
        let kill = CancellationToken::new();
        let relay_kill = kill.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = relay_kill.cancelled() => {}
                _ = tokio::io::copy_bidirectional(&mut relay_server, &mut relay_plugin) => {}
            }
        });
        self.kills
            .lock()
            .unwrap()
            .insert(spec.id.clone(), kill.clone());

        let (pr, pw) = tokio::io::split(plugin_io);
        let options = RuntimeOptions {
            api_timeout: spec.call_timeout,
            ..RuntimeOptions::default()
        };
        let runtime = PluginRuntime::new(spec.id.clone(), factory())
            .with_options(options)
            .spawn(pr, pw);

        let (sr, sw) = tokio::io::split(server_io);
        Ok(LaunchedPlugin {
            reader: Box::new(sr),
            writer: Box::new(sw),
            process: Box::new(RuntimeProcess {
                kill,
                runtime: Some(runtime),
            }),
        })
    }
}

struct RuntimeProcess {
    kill: CancellationToken,
    runtime: Option<RuntimeHandle>,
}

#[async_trait]
impl PluginProcess for RuntimeProcess {
    fn pid(&self) -> Option<u32> {
        None
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.kill.cancel();
        Ok(())
    }

    async fn wait(&mut self) -> io::Result<()> {
        if let Some(runtime) = self.runtime.take() {
            let _ = runtime.join().await;
        }
        Ok(())
    }
}

/// Settings that keep restarts and timeouts short.
pub fn test_config() -> PluginConfig {
    let mut config = PluginConfig::default();
    config.supervisor.max_restart_attempts = 3;
    config.supervisor.initial_backoff_ms = 10;
    config.supervisor.max_backoff_ms = 50;
    config.supervisor.handshake_timeout_ms = 2_000;
    config.supervisor.health_check_interval_ms = 60_000;
    config.supervisor.shutdown_timeout_ms = 1_000;
    config.supervisor.ready_timeout_ms = 3_000;
    config.hooks.lifecycle_timeout_ms = 3_000;
    config.hooks.content_timeout_ms = 3_000;
    config
}

/// Manifest for an in-process plugin.
pub fn manifest(plugin_id: &str, permissions: &[ApiPermission]) -> PluginManifest {
    PluginManifest {
        id: plugin_id.to_string(),
        name: plugin_id.to_string(),
        version: "0.0.1".to_string(),
        executable: "in-process".to_string(),
        args: Vec::new(),
        permissions: permissions.to_vec(),
        settings: None,
        base_dir: PathBuf::new(),
    }
}

/// A plugin host wired to in-process plugins.
pub struct TestHost {
    pub manager: PluginManager,
    pub launcher: Arc<InProcessLauncher>,
    pub users: Arc<InMemoryUserService>,
}

impl TestHost {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: PluginConfig) -> Self {
        let launcher = Arc::new(InProcessLauncher::new());
        let users = Arc::new(InMemoryUserService::new());
        let manager = PluginManager::new(
            config,
            launcher.clone(),
            users.clone(),
            Enterprise::new(),
        )
        .with_stderr_forwarding(false);
        Self {
            manager,
            launcher,
            users,
        }
    }

    /// Registers `factory` for `plugin_id` and loads it.
    pub async fn load<F>(
        &self,
        plugin_id: &str,
        permissions: &[ApiPermission],
        factory: F,
    ) -> AppResult<()>
    where
        F: Fn() -> HookTable + Send + Sync + 'static,
    {
        self.launcher.register(plugin_id, factory);
        self.manager
            .load_plugin(manifest(plugin_id, permissions))
            .await
    }

    /// Like [`load`](Self::load) with initial settings.
    pub async fn load_with_settings<F>(
        &self,
        plugin_id: &str,
        permissions: &[ApiPermission],
        settings: serde_json::Value,
        factory: F,
    ) -> AppResult<()>
    where
        F: Fn() -> HookTable + Send + Sync + 'static,
    {
        self.launcher.register(plugin_id, factory);
        let mut manifest = manifest(plugin_id, permissions);
        manifest.settings = Some(settings);
        self.manager.load_plugin(manifest).await
    }

    /// Adds a user to the directory plugins can query.
    pub fn add_user(&self, username: &str) -> User {
        let user = User::new(username, UserRole::Member);
        self.users.insert(user.clone());
        user
    }
}

/// Receives the next value or fails the test after [`WAIT`].
pub async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for plugin")
        .expect("plugin channel closed")
}
