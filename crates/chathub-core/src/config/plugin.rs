//! Plugin system configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Plugin system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Directory containing one sub-directory (with a `plugin.json`) per plugin.
    #[serde(default = "default_plugin_directory")]
    pub directory: String,
    /// Whether to automatically discover and load plugins on startup.
    #[serde(default = "default_true")]
    pub auto_load: bool,
    /// RPC bridge settings.
    #[serde(default)]
    pub rpc: RpcConfig,
    /// Process supervision settings.
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    /// Hook dispatch settings.
    #[serde(default)]
    pub hooks: HookConfig,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            directory: default_plugin_directory(),
            auto_load: true,
            rpc: RpcConfig::default(),
            supervisor: SupervisorConfig::default(),
            hooks: HookConfig::default(),
        }
    }
}

/// RPC bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Default per-call timeout in milliseconds.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,
    /// Largest frame accepted or sent on a plugin channel.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl RpcConfig {
    /// Default per-call timeout.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

/// Plugin process supervision configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// How long a freshly spawned plugin has to complete the handshake.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,
    /// Interval between health checks of a running plugin.
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_ms: u64,
    /// Timeout applied to each health check call.
    #[serde(default = "default_health_check_timeout")]
    pub health_check_timeout_ms: u64,
    /// Consecutive failures before the plugin is marked failed. Counts
    /// failed start attempts within one start cycle, and separately the
    /// crashes of a plugin that never stayed up for `stable_run_ms`.
    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,
    /// Uptime after which a crash starts a fresh restart count.
    #[serde(default = "default_stable_run")]
    pub stable_run_ms: u64,
    /// Backoff before the first retry.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    /// Upper bound for the exponential backoff.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    /// Time allowed for a graceful shutdown before the process is killed.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
    /// How long a caller waits for a restarting plugin to become ready.
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_ms: u64,
}

impl SupervisorConfig {
    /// Handshake timeout.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Health check interval.
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// Health check call timeout.
    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    /// Uptime that forgives earlier crashes.
    pub fn stable_run(&self) -> Duration {
        Duration::from_millis(self.stable_run_ms)
    }

    /// Graceful shutdown timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Readiness wait for callers.
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    /// Backoff before retry number `attempt` (1-based), doubling each time
    /// and capped at `max_backoff_ms`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_handshake_timeout(),
            health_check_interval_ms: default_health_check_interval(),
            health_check_timeout_ms: default_health_check_timeout(),
            max_restart_attempts: default_max_restart_attempts(),
            stable_run_ms: default_stable_run(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            shutdown_timeout_ms: default_shutdown_timeout(),
            ready_timeout_ms: default_ready_timeout(),
        }
    }
}

/// What the dispatcher does when a plugin fails hard during a content hook.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentErrorPolicy {
    /// Treat the plugin as having made no change and continue the chain.
    #[default]
    Skip,
    /// Turn the error into a rejection and stop the chain.
    Reject,
}

/// Hook dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookConfig {
    /// Per-plugin timeout for lifecycle hooks.
    #[serde(default = "default_lifecycle_timeout")]
    pub lifecycle_timeout_ms: u64,
    /// Per-plugin timeout for content hooks.
    #[serde(default = "default_content_timeout")]
    pub content_timeout_ms: u64,
    /// Handling of hard errors during content hooks.
    #[serde(default)]
    pub content_error_policy: ContentErrorPolicy,
}

impl HookConfig {
    /// Lifecycle hook timeout.
    pub fn lifecycle_timeout(&self) -> Duration {
        Duration::from_millis(self.lifecycle_timeout_ms)
    }

    /// Content hook timeout.
    pub fn content_timeout(&self) -> Duration {
        Duration::from_millis(self.content_timeout_ms)
    }
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            lifecycle_timeout_ms: default_lifecycle_timeout(),
            content_timeout_ms: default_content_timeout(),
            content_error_policy: ContentErrorPolicy::default(),
        }
    }
}

fn default_plugin_directory() -> String {
    "./plugins".to_string()
}

fn default_true() -> bool {
    true
}

fn default_call_timeout() -> u64 {
    5_000
}

fn default_max_frame_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_handshake_timeout() -> u64 {
    5_000
}

fn default_health_check_interval() -> u64 {
    10_000
}

fn default_health_check_timeout() -> u64 {
    2_000
}

fn default_max_restart_attempts() -> u32 {
    5
}

fn default_stable_run() -> u64 {
    60_000
}

fn default_initial_backoff() -> u64 {
    250
}

fn default_max_backoff() -> u64 {
    30_000
}

fn default_shutdown_timeout() -> u64 {
    5_000
}

fn default_ready_timeout() -> u64 {
    10_000
}

fn default_lifecycle_timeout() -> u64 {
    10_000
}

fn default_content_timeout() -> u64 {
    5_000
}
