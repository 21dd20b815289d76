//! Wire frames exchanged between the server and a plugin process.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use chathub_core::AppError;

/// Version of the frame protocol. Both sides must agree at handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// A single message on a plugin channel.
///
/// Every frame is self-describing: the `type` tag distinguishes the
/// handshake exchange from calls and responses, and calls/responses carry
/// the correlation id and method name alongside the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// First frame sent by a plugin: identity and capability set.
    Handshake {
        /// Protocol version spoken by the plugin.
        protocol_version: u32,
        /// Plugin id the process believes it was launched as.
        plugin_id: String,
        /// Hook names the plugin implements.
        hooks: Vec<String>,
    },
    /// Server acceptance of a handshake.
    HandshakeAck {
        /// Liveness generation assigned to this process instance.
        generation: u64,
    },
    /// Server refusal of a handshake.
    HandshakeReject {
        /// Why the plugin was refused.
        reason: String,
    },
    /// A request from either side.
    Call {
        /// Correlation id, unique per direction within a generation.
        id: u64,
        /// Method being invoked (e.g. `Hooks.OnActivate`, `API.GetUser`).
        method: String,
        /// Serialized arguments.
        args: Value,
    },
    /// The answer to a previous [`Frame::Call`] from the other side.
    Response {
        /// Correlation id of the call being answered.
        id: u64,
        /// Method of the call being answered.
        method: String,
        /// Returned value, or the application error the handler failed with.
        reply: Reply,
    },
}

impl Frame {
    /// Short name of the frame variant, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Handshake { .. } => "handshake",
            Self::HandshakeAck { .. } => "handshake_ack",
            Self::HandshakeReject { .. } => "handshake_reject",
            Self::Call { .. } => "call",
            Self::Response { .. } => "response",
        }
    }
}

/// Outcome carried in a [`Frame::Response`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    /// The call succeeded.
    Ok {
        /// Serialized return value.
        value: Value,
    },
    /// The call failed with an application error.
    Error {
        /// The structured error.
        error: AppError,
    },
}

impl Reply {
    /// Converts the reply into a `Result`.
    pub fn into_result(self) -> Result<Value, AppError> {
        match self {
            Self::Ok { value } => Ok(value),
            Self::Error { error } => Err(error),
        }
    }
}

impl From<Result<Value, AppError>> for Reply {
    fn from(result: Result<Value, AppError>) -> Self {
        match result {
            Ok(value) => Self::Ok { value },
            Err(error) => Self::Error { error },
        }
    }
}
