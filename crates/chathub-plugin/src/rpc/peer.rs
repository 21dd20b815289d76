//! One end of an RPC channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use chathub_core::AppError;

use super::RpcError;
use super::handler::{CallContext, HandlerTable};
use crate::transport::{Frame, FrameReader, FrameWriter, Reply, Transport};

/// Evidence that the process on the other end may be unhealthy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivenessSignal {
    /// A call timed out. The process may only be slow.
    Timeout {
        /// Generation of the peer the call was made on.
        generation: u64,
        /// Method that timed out.
        method: String,
    },
    /// The channel closed or failed. The process is gone or unusable.
    TransportClosed {
        /// Generation of the peer that closed.
        generation: u64,
        /// What happened.
        reason: String,
    },
}

impl LivenessSignal {
    /// Generation the signal refers to.
    pub fn generation(&self) -> u64 {
        match self {
            Self::Timeout { generation, .. } | Self::TransportClosed { generation, .. } => {
                *generation
            }
        }
    }
}

/// Construction options for an [`RpcPeer`].
#[derive(Debug, Clone)]
pub struct PeerOptions {
    /// Identity of the channel, used in logs and bound into handler contexts.
    pub label: String,
    /// Liveness generation of the process on this channel.
    pub generation: u64,
    /// Where to report liveness failures.
    pub liveness: Option<mpsc::UnboundedSender<LivenessSignal>>,
}

impl PeerOptions {
    /// Options without liveness reporting.
    pub fn new(label: impl Into<String>, generation: u64) -> Self {
        Self {
            label: label.into(),
            generation,
            liveness: None,
        }
    }

    /// Reports liveness failures to `tx`.
    pub fn with_liveness(mut self, tx: mpsc::UnboundedSender<LivenessSignal>) -> Self {
        self.liveness = Some(tx);
        self
    }
}

struct PendingCall {
    method: String,
    tx: oneshot::Sender<Result<Value, RpcError>>,
}

/// Removes a pending entry when the waiting caller goes away, whether it
/// finished normally or its future was dropped.
struct PendingGuard<'a> {
    pending: &'a DashMap<u64, PendingCall>,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// A multiplexed RPC endpoint.
///
/// Outgoing calls get fresh correlation ids from a counter that starts at
/// 1 and never wraps within a peer's lifetime; a peer lives exactly as long
/// as one process generation. Inbound calls are each served on their own
/// task so a slow handler never blocks the read loop.
pub struct RpcPeer {
    label: String,
    generation: u64,
    next_id: AtomicU64,
    pending: DashMap<u64, PendingCall>,
    handlers: Arc<HandlerTable>,
    outbound: mpsc::UnboundedSender<Frame>,
    shutdown: CancellationToken,
    closed: AtomicBool,
    retired: AtomicBool,
    liveness: Option<mpsc::UnboundedSender<LivenessSignal>>,
}

impl RpcPeer {
    /// Starts the read and write loops for `transport`.
    pub fn spawn(
        transport: Transport,
        handlers: Arc<HandlerTable>,
        options: PeerOptions,
    ) -> Arc<Self> {
        let (reader, writer) = transport.into_parts();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let peer = Arc::new(Self {
            label: options.label,
            generation: options.generation,
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            handlers,
            outbound,
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
            retired: AtomicBool::new(false),
            liveness: options.liveness,
        });

        tokio::spawn(write_loop(
            Arc::downgrade(&peer),
            writer,
            outbound_rx,
            peer.shutdown.clone(),
        ));
        tokio::spawn(read_loop(Arc::clone(&peer), reader));

        peer
    }

    /// Channel identity.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Process generation this peer talks to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the channel has closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of outgoing calls awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Resolves once the channel has closed.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await;
    }

    /// Calls `method` on the other side and waits for its reply.
    ///
    /// Resolves exactly once: with the reply, a timeout, or the error that
    /// closed the channel. A timeout is reported as a liveness signal.
    pub async fn call(
        &self,
        method: &str,
        args: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingCall {
                method: method.to_string(),
                tx,
            },
        );
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        // The channel may have closed between the first check and the
        // insert, after the pending table was drained.
        if self.is_closed() {
            return Err(self.closed_error());
        }

        trace!(label = %self.label, generation = self.generation, id, method, "Sending call");
        let frame = Frame::Call {
            id,
            method: method.to_string(),
            args,
        };
        if self.outbound.send(frame).is_err() {
            return Err(self.closed_error());
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(self.closed_error()),
            Err(_) => {
                warn!(
                    label = %self.label,
                    generation = self.generation,
                    method,
                    timeout_ms = timeout.as_millis() as u64,
                    "RPC call timed out"
                );
                self.signal(LivenessSignal::Timeout {
                    generation: self.generation,
                    method: method.to_string(),
                });
                Err(RpcError::Timeout {
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Typed variant of [`RpcPeer::call`].
    pub async fn call_typed<A, R>(
        &self,
        method: &str,
        args: &A,
        timeout: Duration,
    ) -> Result<R, RpcError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let args = serde_json::to_value(args).map_err(|e| RpcError::App(AppError::from(e)))?;
        let value = self.call(method, args, timeout).await?;
        serde_json::from_value(value)
            .map_err(|e| RpcError::MalformedResponse(format!("{method}: {e}")))
    }

    /// Closes the channel locally. Pending calls resolve as transport-closed.
    pub fn close(&self) {
        self.close_with(RpcError::TransportClosed, false);
    }

    /// Closes the channel because its process generation was replaced.
    /// Pending calls resolve as stale-generation.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
        self.close_with(
            RpcError::StaleGeneration {
                generation: self.generation,
            },
            false,
        );
    }

    fn closed_error(&self) -> RpcError {
        if self.retired.load(Ordering::SeqCst) {
            RpcError::StaleGeneration {
                generation: self.generation,
            }
        } else {
            RpcError::TransportClosed
        }
    }

    fn close_with(&self, err: RpcError, report: bool) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();

        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        let drained = ids.len();
        for id in ids {
            if let Some((_, call)) = self.pending.remove(&id) {
                let _ = call.tx.send(Err(err.clone()));
            }
        }

        debug!(
            label = %self.label,
            generation = self.generation,
            drained,
            reason = %err,
            "RPC channel closed"
        );

        if report && err.is_liveness_failure() {
            self.signal(LivenessSignal::TransportClosed {
                generation: self.generation,
                reason: err.to_string(),
            });
        }
    }

    fn signal(&self, signal: LivenessSignal) {
        if self.retired.load(Ordering::SeqCst) {
            return;
        }
        if let Some(tx) = &self.liveness {
            let _ = tx.send(signal);
        }
    }

    fn complete(&self, id: u64, method: &str, reply: Reply) {
        let Some((_, call)) = self.pending.remove(&id) else {
            debug!(
                label = %self.label,
                id,
                method,
                "Discarding response for unknown or abandoned call"
            );
            return;
        };

        let result = if call.method != method {
            Err(RpcError::MalformedResponse(format!(
                "response for '{method}' answered call '{}'",
                call.method
            )))
        } else {
            reply.into_result().map_err(RpcError::App)
        };
        let _ = call.tx.send(result);
    }

    fn dispatch_inbound(self: &Arc<Self>, id: u64, method: String, args: Value) {
        let peer = Arc::clone(self);
        tokio::spawn(async move {
            let result = match peer.handlers.get(&method) {
                Some(handler) => {
                    let ctx = CallContext {
                        peer: Arc::clone(&peer),
                    };
                    tokio::select! {
                        _ = peer.shutdown.cancelled() => return,
                        result = handler.handle(ctx, args) => result,
                    }
                }
                None => Err(AppError::not_implemented(format!(
                    "Method '{method}' is not implemented"
                ))
                .at("rpc.dispatch")),
            };

            if let Err(err) = &result {
                debug!(label = %peer.label, id, method = %method, error = %err, "Inbound call failed");
            }

            let frame = Frame::Response {
                id,
                method,
                reply: result.into(),
            };
            if peer.outbound.send(frame).is_err() {
                debug!(label = %peer.label, id, "Channel closed before response could be sent");
            }
        });
    }
}

impl std::fmt::Debug for RpcPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcPeer")
            .field("label", &self.label)
            .field("generation", &self.generation)
            .field("pending", &self.pending.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn read_loop(peer: Arc<RpcPeer>, mut reader: FrameReader) {
    let shutdown = peer.shutdown.clone();
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => return,
            next = reader.next() => next,
        };

        match next {
            Some(Ok(Frame::Call { id, method, args })) => peer.dispatch_inbound(id, method, args),
            Some(Ok(Frame::Response { id, method, reply })) => peer.complete(id, &method, reply),
            Some(Ok(other)) => {
                warn!(label = %peer.label, kind = other.kind(), "Ignoring unexpected frame");
            }
            Some(Err(err)) => {
                peer.close_with(RpcError::Transport(err.to_string()), true);
                return;
            }
            None => {
                peer.close_with(RpcError::TransportClosed, true);
                return;
            }
        }
    }
}

async fn write_loop(
    peer: Weak<RpcPeer>,
    mut writer: FrameWriter,
    mut rx: mpsc::UnboundedReceiver<Frame>,
    shutdown: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            frame = rx.recv() => frame,
            _ = shutdown.cancelled() => None,
        };
        let Some(frame) = frame else { break };

        if let Err(err) = writer.send(frame).await {
            if let Some(peer) = peer.upgrade() {
                peer.close_with(RpcError::Transport(err.to_string()), true);
            }
            return;
        }
    }

    // Responses queued just before shutdown still go out.
    while let Ok(frame) = rx.try_recv() {
        if writer.send(frame).await.is_err() {
            break;
        }
    }
    let _ = writer.close().await;
}
