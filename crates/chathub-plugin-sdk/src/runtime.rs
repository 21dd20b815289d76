//! Plugin process entry point.
//!
//! [`PluginRuntime`] owns everything a plugin process needs for its
//! lifetime: the channel to the server, the hook handlers and the stop
//! signal. It is started explicitly with [`PluginRuntime::serve`] (or
//! [`PluginRuntime::spawn`] for an in-process handle) and ends when the
//! server requests shutdown, the channel closes, or [`RuntimeHandle::stop`]
//! is called.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use chathub_plugin::rpc::{HandlerTable, PING_METHOD, PeerOptions, RpcPeer, SHUTDOWN_METHOD};
use chathub_plugin::supervisor::{CALL_TIMEOUT_ENV, PLUGIN_ID_ENV};
use chathub_plugin::transport::{Transport, offer_handshake};

use crate::error::SdkError;
use crate::hooks::HookTable;

/// Tunables of a plugin runtime.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// How long to wait for the server's handshake answer.
    pub handshake_timeout: Duration,
    /// Per-call timeout for server API calls.
    pub api_timeout: Duration,
    /// Largest frame accepted or sent.
    pub max_frame_bytes: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            api_timeout: Duration::from_secs(5),
            max_frame_bytes: 16 * 1024 * 1024,
        }
    }
}

/// What the server told the plugin process at launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginEnvironment {
    /// Id the plugin was launched as.
    pub plugin_id: String,
    /// Timeout the server wants applied to API calls, if it sent one.
    pub call_timeout: Option<Duration>,
}

impl PluginEnvironment {
    /// Reads the launch environment of the current process.
    pub fn from_env() -> Result<Self, SdkError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the launch environment through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SdkError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let plugin_id = match lookup(PLUGIN_ID_ENV) {
            Some(plugin_id) if !plugin_id.is_empty() => plugin_id,
            _ => {
                return Err(SdkError::Environment(format!(
                    "{PLUGIN_ID_ENV} is not set; plugins must be launched by the server"
                )));
            }
        };

        let call_timeout = match lookup(CALL_TIMEOUT_ENV) {
            None => None,
            Some(raw) => match raw.parse::<u64>() {
                Ok(ms) if ms > 0 => Some(Duration::from_millis(ms)),
                _ => {
                    return Err(SdkError::Environment(format!(
                        "{CALL_TIMEOUT_ENV} must be a positive number of milliseconds, got '{raw}'"
                    )));
                }
            },
        };

        Ok(Self {
            plugin_id,
            call_timeout,
        })
    }

    /// Runtime options honouring what the server asked for.
    pub fn runtime_options(&self) -> RuntimeOptions {
        let mut options = RuntimeOptions::default();
        if let Some(timeout) = self.call_timeout {
            options.api_timeout = timeout;
        }
        options
    }
}

/// A plugin's connection to the server.
#[derive(Debug)]
pub struct PluginRuntime {
    plugin_id: String,
    hooks: HookTable,
    options: RuntimeOptions,
    stop: CancellationToken,
}

impl PluginRuntime {
    /// Creates a runtime for `plugin_id` implementing `hooks`.
    pub fn new(plugin_id: impl Into<String>, hooks: HookTable) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            hooks,
            options: RuntimeOptions::default(),
            stop: CancellationToken::new(),
        }
    }

    /// Replaces the default options.
    pub fn with_options(mut self, options: RuntimeOptions) -> Self {
        self.options = options;
        self
    }

    /// Plugin id.
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Token that stops the runtime when cancelled.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Serves the server over stdin/stdout until stopped.
    pub async fn serve_stdio(self) -> Result<(), SdkError> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Starts serving on a background task.
    pub fn spawn<R, W>(self, reader: R, writer: W) -> RuntimeHandle
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let stop = self.stop.clone();
        let task = tokio::spawn(self.serve(reader, writer));
        RuntimeHandle { stop, task }
    }

    /// Handshakes with the server, then serves hook calls until the server
    /// asks the plugin to shut down, the stop token is cancelled, or the
    /// channel closes.
    ///
    /// Returns [`SdkError::ConnectionLost`] if the channel closed without a
    /// stop request.
    pub async fn serve<R, W>(self, reader: R, writer: W) -> Result<(), SdkError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut transport = Transport::new(reader, writer, self.options.max_frame_bytes);
        let capabilities = self
            .hooks
            .capabilities()
            .into_iter()
            .map(|hook| hook.as_str().to_string())
            .collect();

        let generation = tokio::select! {
            _ = self.stop.cancelled() => return Ok(()),
            result = offer_handshake(
                &mut transport,
                &self.plugin_id,
                capabilities,
                self.options.handshake_timeout,
            ) => result?,
        };
        info!(plugin_id = %self.plugin_id, generation, "Connected to server");

        let handlers = HandlerTable::new();
        self.hooks.install(&handlers, self.options.api_timeout);
        handlers.register_fn(PING_METHOD, |_, _| async { Ok(Value::Null) });
        let stop = self.stop.clone();
        handlers.register_fn(SHUTDOWN_METHOD, move |_, _| {
            let stop = stop.clone();
            async move {
                stop.cancel();
                Ok(Value::Null)
            }
        });

        let peer = RpcPeer::spawn(
            transport,
            Arc::new(handlers),
            PeerOptions::new(self.plugin_id.clone(), generation),
        );

        let outcome = tokio::select! {
            _ = self.stop.cancelled() => Ok(()),
            _ = peer.closed() => {
                if self.stop.is_cancelled() {
                    Ok(())
                } else {
                    Err(SdkError::ConnectionLost)
                }
            }
        };

        // Let a shutdown reply queued by the handler reach the write loop.
        tokio::task::yield_now().await;
        peer.close();
        debug!(plugin_id = %self.plugin_id, "Plugin runtime stopped");
        outcome
    }
}

/// Handle to a runtime started with [`PluginRuntime::spawn`].
#[derive(Debug)]
pub struct RuntimeHandle {
    stop: CancellationToken,
    task: JoinHandle<Result<(), SdkError>>,
}

impl RuntimeHandle {
    /// Asks the runtime to stop. Returns immediately.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Whether the runtime has finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the runtime to finish.
    pub async fn join(self) -> Result<(), SdkError> {
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(SdkError::Environment(format!("runtime task failed: {err}"))),
        }
    }

    /// Aborts the runtime task without a graceful stop, as if the process
    /// had been killed.
    pub fn abort(&self) {
        self.task.abort();
    }
}
