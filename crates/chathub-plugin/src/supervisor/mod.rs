//! Plugin process supervision.
//!
//! State machine per plugin:
//!
//! ```text
//! Stopped → Starting → Handshaking → Running → (Unhealthy | Stopping) → Stopped
//!                                                     ↘ Failed (start attempts exhausted)
//! ```

pub mod launcher;
pub mod process_supervisor;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use chathub_core::AppError;

use crate::rpc::RpcError;
use crate::transport::TransportError;

pub use launcher::{
    CALL_TIMEOUT_ENV, CommandLauncher, LaunchedPlugin, PLUGIN_ID_ENV, PluginLauncher, PluginProcess, PluginSpec,
};
pub use process_supervisor::{PluginStatus, PluginSupervisor, ProcessHandle};

/// Lifecycle state of a supervised plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    /// No process. Either never started, between start attempts, or stopped.
    Stopped,
    /// Spawning the process.
    Starting,
    /// Waiting for the plugin's identification frame.
    Handshaking,
    /// Handshake and activation done; calls are accepted.
    Running,
    /// Failed a health check or lost its channel; about to be restarted.
    Unhealthy,
    /// Graceful shutdown in progress.
    Stopping,
    /// Start attempts exhausted. Not restarted automatically.
    Failed,
}

impl PluginState {
    /// Return the state as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Handshaking => "handshaking",
            Self::Running => "running",
            Self::Unhealthy => "unhealthy",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a plugin could not be brought up.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The process could not be spawned.
    #[error("failed to launch plugin '{plugin_id}': {source}")]
    Launch {
        /// Plugin id.
        plugin_id: String,
        /// Spawn error.
        #[source]
        source: std::io::Error,
    },

    /// The handshake failed or was refused.
    #[error("handshake with plugin '{plugin_id}' failed: {source}")]
    Handshake {
        /// Plugin id.
        plugin_id: String,
        /// Transport-level cause.
        #[source]
        source: TransportError,
    },

    /// `OnActivate` failed.
    #[error("plugin '{plugin_id}' failed to activate: {source}")]
    Activation {
        /// Plugin id.
        plugin_id: String,
        /// Call failure.
        #[source]
        source: RpcError,
    },

    /// Every start attempt failed.
    #[error("plugin '{plugin_id}' failed after {attempts} start attempts: {last_error}")]
    Exhausted {
        /// Plugin id.
        plugin_id: String,
        /// Attempts made.
        attempts: u32,
        /// Error of the final attempt.
        last_error: String,
    },

    /// The supervisor was stopped while starting.
    #[error("plugin '{0}' was stopped")]
    Stopped(String),
}

impl SupervisorError {
    /// Whether another start attempt could succeed. An activation that the
    /// plugin itself refused with an application error will not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Launch { .. } | Self::Handshake { .. } => true,
            Self::Activation { source, .. } => source.is_liveness_failure(),
            Self::Exhausted { .. } | Self::Stopped(_) => false,
        }
    }
}

impl From<SupervisorError> for AppError {
    fn from(err: SupervisorError) -> Self {
        match err {
            SupervisorError::Activation {
                source: RpcError::App(cause),
                plugin_id,
            } => AppError::plugin(format!("Plugin '{plugin_id}' failed to activate"))
                .at("plugin.activate")
                .caused_by(cause),
            other => AppError::plugin(other.to_string()).at("plugin.supervisor"),
        }
    }
}
