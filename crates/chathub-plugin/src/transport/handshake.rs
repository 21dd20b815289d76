//! Initial identification exchange.
//!
//! The plugin speaks first with a [`Frame::Handshake`] naming itself and
//! its capability set; the server answers with an ack carrying the
//! liveness generation, or a reject. No calls flow before the ack.

use std::time::Duration;

use tracing::{debug, warn};

use super::frame::{Frame, PROTOCOL_VERSION};
use super::{Transport, TransportError};

/// Server side: waits for the plugin's handshake and validates it.
///
/// Returns the declared hook names on success.
pub async fn accept_handshake(
    transport: &mut Transport,
    expected_plugin_id: &str,
    generation: u64,
    timeout: Duration,
) -> Result<Vec<String>, TransportError> {
    let frame = tokio::time::timeout(timeout, transport.recv())
        .await
        .map_err(|_| TransportError::HandshakeTimeout(timeout))??;

    let (protocol_version, plugin_id, hooks) = match frame {
        Frame::Handshake {
            protocol_version,
            plugin_id,
            hooks,
        } => (protocol_version, plugin_id, hooks),
        other => return Err(TransportError::UnexpectedFrame(other.kind())),
    };

    let refusal = if protocol_version != PROTOCOL_VERSION {
        Some(TransportError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            actual: protocol_version,
        })
    } else if plugin_id != expected_plugin_id {
        Some(TransportError::PluginIdMismatch {
            expected: expected_plugin_id.to_string(),
            actual: plugin_id,
        })
    } else {
        None
    };

    if let Some(err) = refusal {
        warn!(plugin_id = %expected_plugin_id, error = %err, "Refusing plugin handshake");
        let reject = Frame::HandshakeReject {
            reason: err.to_string(),
        };
        // The plugin may already be gone; the refusal is what matters.
        let _ = transport.send(reject).await;
        return Err(err);
    }

    transport.send(Frame::HandshakeAck { generation }).await?;
    debug!(
        plugin_id = %expected_plugin_id,
        generation,
        hooks = ?hooks,
        "Plugin handshake accepted"
    );
    Ok(hooks)
}

/// Plugin side: announces identity and capabilities, waits for the ack.
///
/// Returns the generation the server assigned.
pub async fn offer_handshake(
    transport: &mut Transport,
    plugin_id: &str,
    hooks: Vec<String>,
    timeout: Duration,
) -> Result<u64, TransportError> {
    transport
        .send(Frame::Handshake {
            protocol_version: PROTOCOL_VERSION,
            plugin_id: plugin_id.to_string(),
            hooks,
        })
        .await?;

    let frame = tokio::time::timeout(timeout, transport.recv())
        .await
        .map_err(|_| TransportError::HandshakeTimeout(timeout))??;

    match frame {
        Frame::HandshakeAck { generation } => Ok(generation),
        Frame::HandshakeReject { reason } => Err(TransportError::HandshakeRejected(reason)),
        other => Err(TransportError::UnexpectedFrame(other.kind())),
    }
}
