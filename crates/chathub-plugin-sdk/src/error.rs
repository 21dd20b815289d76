//! SDK errors.

use thiserror::Error;

use chathub_core::AppError;
use chathub_plugin::rpc::RpcError;
use chathub_plugin::transport::TransportError;

/// Why a plugin runtime stopped abnormally.
#[derive(Debug, Error)]
pub enum SdkError {
    /// The launch environment is incomplete.
    #[error("plugin environment error: {0}")]
    Environment(String),

    /// Framing or handshake failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server closed the channel without asking the plugin to stop.
    #[error("connection to server lost")]
    ConnectionLost,

    /// A call to the server failed.
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl From<SdkError> for AppError {
    fn from(err: SdkError) -> Self {
        match err {
            SdkError::Rpc(rpc) => rpc.into(),
            other => AppError::plugin(other.to_string()).at("sdk.runtime"),
        }
    }
}
