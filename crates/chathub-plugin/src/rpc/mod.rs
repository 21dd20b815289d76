//! Bidirectional RPC bridge.
//!
//! Both the server and a plugin run an [`RpcPeer`] over the same
//! transport. Each peer owns its outgoing correlation-id space and pending
//! table, and serves inbound calls from a [`HandlerTable`]; the two
//! directions never wait on each other, which is what makes nested
//! plugin-to-server calls during a server-to-plugin hook safe.

pub mod handler;
pub mod peer;

use std::time::Duration;

use thiserror::Error;

use chathub_core::{AppError, ErrorKind};

pub use handler::{CallContext, HandlerTable, RpcHandler};
pub use peer::{LivenessSignal, PeerOptions, RpcPeer};

/// Health check method served by every plugin runtime.
pub const PING_METHOD: &str = "Plugin.Ping";

/// Graceful stop request served by every plugin runtime.
pub const SHUTDOWN_METHOD: &str = "Plugin.Shutdown";

/// Failure of a single RPC call.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// The channel closed before the response arrived.
    #[error("transport closed")]
    TransportClosed,

    /// Reading or writing the channel failed.
    #[error("transport failure: {0}")]
    Transport(String),

    /// No response arrived before the deadline.
    #[error("call '{method}' timed out after {timeout:?}")]
    Timeout {
        /// Method that timed out.
        method: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// The call belonged to a process instance that has since been replaced.
    #[error("call belongs to stale process generation {generation}")]
    StaleGeneration {
        /// Generation the call was issued against.
        generation: u64,
    },

    /// No running process is available for the plugin.
    #[error("plugin '{0}' is not running")]
    NotRunning(String),

    /// The response value did not have the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The other side returned an application error.
    #[error(transparent)]
    App(#[from] AppError),
}

impl RpcError {
    /// Whether this failure says something about the health of the plugin
    /// process. Application errors never do.
    pub fn is_liveness_failure(&self) -> bool {
        matches!(
            self,
            Self::TransportClosed | Self::Transport(_) | Self::Timeout { .. }
        )
    }

    /// Returns the application error, if this is one.
    pub fn as_app_error(&self) -> Option<&AppError> {
        match self {
            Self::App(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RpcError> for AppError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::App(app) => app,
            RpcError::Timeout { .. } => AppError::timeout(err.to_string()).at("rpc.call"),
            RpcError::MalformedResponse(_) => {
                AppError::new(ErrorKind::Serialization, err.to_string()).at("rpc.call")
            }
            RpcError::TransportClosed
            | RpcError::Transport(_)
            | RpcError::StaleGeneration { .. }
            | RpcError::NotRunning(_) => {
                AppError::service_unavailable(err.to_string()).at("rpc.call")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liveness_classification() {
        assert!(RpcError::TransportClosed.is_liveness_failure());
        assert!(
            RpcError::Timeout {
                method: "Hooks.OnActivate".into(),
                timeout: Duration::from_secs(1),
            }
            .is_liveness_failure()
        );
        assert!(!RpcError::App(AppError::not_found("x")).is_liveness_failure());
        assert!(!RpcError::StaleGeneration { generation: 1 }.is_liveness_failure());
    }

    #[test]
    fn test_app_error_passes_through_unchanged() {
        let original = AppError::authorization("denied").at("api.get_user");
        let converted: AppError = RpcError::App(original.clone()).into();
        assert_eq!(converted, original);

        let converted: AppError = RpcError::TransportClosed.into();
        assert_eq!(converted.kind, ErrorKind::ServiceUnavailable);
    }
}
