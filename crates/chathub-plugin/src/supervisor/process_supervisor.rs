//! Per-plugin supervisor: start, monitor, restart, stop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use chathub_core::config::PluginConfig;
use chathub_core::config::plugin::SupervisorConfig;

use super::launcher::{PluginLauncher, PluginProcess, PluginSpec};
use super::{PluginState, SupervisorError};
use crate::hooks::{HookName, HookRegistry};
use crate::rpc::{
    HandlerTable, LivenessSignal, PING_METHOD, PeerOptions, RpcError, RpcPeer, SHUTDOWN_METHOD,
};
use crate::transport::{Transport, accept_handshake};

/// One live process instance of a plugin.
///
/// Replaced wholesale on restart; callers must re-resolve the current handle
/// for every call rather than holding one across a suspension point.
pub struct ProcessHandle {
    generation: u64,
    started_at: DateTime<Utc>,
    running_since: Instant,
    peer: Arc<RpcPeer>,
    process: Mutex<Box<dyn PluginProcess>>,
    hooks: Vec<HookName>,
}

impl ProcessHandle {
    /// Liveness generation of this instance.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// When the process completed its handshake.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// RPC endpoint for this instance.
    pub fn peer(&self) -> &Arc<RpcPeer> {
        &self.peer
    }

    /// Hooks declared at handshake.
    pub fn hooks(&self) -> &[HookName] {
        &self.hooks
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("generation", &self.generation)
            .field("started_at", &self.started_at)
            .field("hooks", &self.hooks)
            .finish()
    }
}

/// Snapshot of a supervised plugin.
#[derive(Debug, Clone, Serialize)]
pub struct PluginStatus {
    /// Plugin id.
    pub plugin_id: String,
    /// Executable path.
    pub executable: String,
    /// Current lifecycle state.
    pub state: PluginState,
    /// Generation of the current process, or of the last one started.
    pub generation: u64,
    /// Failed attempts in the current start cycle.
    pub restart_attempts: u32,
    /// Restarts performed since the plugin was loaded.
    pub restarts: u64,
    /// Crashes in a row without a stable run in between.
    pub crash_streak: u32,
    /// Hooks the running instance declared.
    pub hooks: Vec<HookName>,
    /// When the running instance started.
    pub started_at: Option<DateTime<Utc>>,
    /// Most recent failure, if any.
    pub last_failure: Option<String>,
}

/// Owns the process lifecycle of one plugin.
pub struct PluginSupervisor {
    spec: PluginSpec,
    launcher: Arc<dyn PluginLauncher>,
    handlers: Arc<HandlerTable>,
    hook_registry: Arc<HookRegistry>,
    config: SupervisorConfig,
    max_frame_bytes: usize,
    activate_timeout: Duration,
    state_tx: watch::Sender<PluginState>,
    handle_tx: watch::Sender<Option<Arc<ProcessHandle>>>,
    generation: AtomicU64,
    restart_attempts: AtomicU32,
    restarts: AtomicU64,
    crash_streak: AtomicU32,
    last_failure: RwLock<Option<String>>,
    wanted: AtomicBool,
    liveness_tx: mpsc::UnboundedSender<LivenessSignal>,
    liveness_rx: Mutex<Option<mpsc::UnboundedReceiver<LivenessSignal>>>,
    cancel: CancellationToken,
    lifecycle: Mutex<()>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl PluginSupervisor {
    /// Creates a supervisor. Nothing is spawned until [`start`](Self::start).
    ///
    /// `handlers` serve the plugin's inbound API calls and are bound to
    /// every process generation of this plugin.
    pub fn new(
        spec: PluginSpec,
        launcher: Arc<dyn PluginLauncher>,
        handlers: Arc<HandlerTable>,
        hook_registry: Arc<HookRegistry>,
        config: &PluginConfig,
    ) -> Arc<Self> {
        let (liveness_tx, liveness_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            spec,
            launcher,
            handlers,
            hook_registry,
            config: config.supervisor.clone(),
            max_frame_bytes: config.rpc.max_frame_bytes,
            activate_timeout: config.hooks.lifecycle_timeout(),
            state_tx: watch::Sender::new(PluginState::Stopped),
            handle_tx: watch::Sender::new(None),
            generation: AtomicU64::new(0),
            restart_attempts: AtomicU32::new(0),
            restarts: AtomicU64::new(0),
            crash_streak: AtomicU32::new(0),
            last_failure: RwLock::new(None),
            wanted: AtomicBool::new(false),
            liveness_tx,
            liveness_rx: Mutex::new(Some(liveness_rx)),
            cancel: CancellationToken::new(),
            lifecycle: Mutex::new(()),
            monitor: Mutex::new(None),
        })
    }

    /// Plugin id.
    pub fn plugin_id(&self) -> &str {
        &self.spec.id
    }

    /// Launch spec.
    pub fn spec(&self) -> &PluginSpec {
        &self.spec
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PluginState {
        *self.state_tx.borrow()
    }

    /// Watches lifecycle state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<PluginState> {
        self.state_tx.subscribe()
    }

    /// The running process, if any, without waiting.
    pub fn current(&self) -> Option<Arc<ProcessHandle>> {
        self.handle_tx.borrow().clone()
    }

    /// Snapshot for operators.
    pub async fn status(&self) -> PluginStatus {
        let current = self.current();
        PluginStatus {
            plugin_id: self.spec.id.clone(),
            executable: self.spec.executable.display().to_string(),
            state: self.state(),
            generation: current
                .as_ref()
                .map(|h| h.generation)
                .unwrap_or_else(|| self.generation.load(Ordering::SeqCst)),
            restart_attempts: self.restart_attempts.load(Ordering::SeqCst),
            restarts: self.restarts.load(Ordering::SeqCst),
            crash_streak: self.crash_streak.load(Ordering::SeqCst),
            hooks: current.as_ref().map(|h| h.hooks.clone()).unwrap_or_default(),
            started_at: current.as_ref().map(|h| h.started_at),
            last_failure: self.last_failure.read().await.clone(),
        }
    }

    /// Brings the plugin up, retrying with backoff.
    ///
    /// Returns once the plugin is running and activated, or once start
    /// attempts are exhausted (state `Failed`).
    pub async fn start(self: &Arc<Self>) -> Result<(), SupervisorError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.cancel.is_cancelled() {
            return Err(SupervisorError::Stopped(self.spec.id.clone()));
        }
        if self.current().is_some() {
            return Ok(());
        }

        self.wanted.store(true, Ordering::SeqCst);
        self.ensure_monitor().await;
        self.run_start_cycle().await
    }

    /// Calls `method` on the current process.
    ///
    /// Waits up to the ready timeout for a restarting plugin to come back.
    pub async fn call(
        &self,
        method: &str,
        args: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let handle = self.current_handle().await?;
        handle.peer.call(method, args, timeout).await
    }

    /// Typed variant of [`call`](Self::call).
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
        let handle = self.current_handle().await?;
        handle.peer.call_typed(method, args, timeout).await
    }

    /// Resolves the current process handle, waiting for a restart in progress.
    pub async fn current_handle(&self) -> Result<Arc<ProcessHandle>, RpcError> {
        let mut rx = self.handle_tx.subscribe();
        let wait = async {
            loop {
                let current = rx.borrow_and_update().clone();
                if let Some(handle) = current {
                    return Ok(handle);
                }
                if !self.is_recovering() {
                    return Err(RpcError::NotRunning(self.spec.id.clone()));
                }
                if rx.changed().await.is_err() {
                    return Err(RpcError::NotRunning(self.spec.id.clone()));
                }
            }
        };

        match tokio::time::timeout(self.config.ready_timeout(), wait).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::NotRunning(self.spec.id.clone())),
        }
    }

    /// Gracefully stops the plugin: `Plugin.Shutdown`, a bounded wait for
    /// exit, then a forced kill. The supervisor cannot be restarted after.
    pub async fn stop(&self) {
        self.wanted.store(false, Ordering::SeqCst);
        self.cancel.cancel();

        {
            let _lifecycle = self.lifecycle.lock().await;
            self.set_state(PluginState::Stopping);

            if let Some(handle) = self.handle_tx.send_replace(None) {
                let timeout = self.config.shutdown_timeout();
                match handle.peer.call(SHUTDOWN_METHOD, Value::Null, timeout).await {
                    Ok(_) | Err(RpcError::TransportClosed) => {}
                    Err(err) => {
                        debug!(plugin_id = %self.spec.id, error = %err, "Shutdown request failed");
                    }
                }

                let exited = {
                    let mut process = handle.process.lock().await;
                    tokio::time::timeout(timeout, process.wait()).await.is_ok()
                };
                if !exited {
                    warn!(
                        plugin_id = %self.spec.id,
                        generation = handle.generation,
                        "Plugin did not exit in time, killing"
                    );
                }
                self.terminate(&handle).await;
            }

            self.hook_registry.unregister_plugin(&self.spec.id).await;
            self.set_state(PluginState::Stopped);
        }

        if let Some(monitor) = self.monitor.lock().await.take() {
            let _ = monitor.await;
        }

        info!(plugin_id = %self.spec.id, "Plugin stopped");
    }

    fn set_state(&self, state: PluginState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(plugin_id = %self.spec.id, from = %previous, to = %state, "Plugin state changed");
        }
    }

    fn is_recovering(&self) -> bool {
        self.wanted.load(Ordering::SeqCst) && self.state() != PluginState::Failed
    }

    async fn ensure_monitor(self: &Arc<Self>) {
        let mut monitor = self.monitor.lock().await;
        if monitor.is_some() {
            return;
        }
        if let Some(rx) = self.liveness_rx.lock().await.take() {
            *monitor = Some(tokio::spawn(Arc::clone(self).monitor_loop(rx)));
        }
    }

    /// Start attempts with exponential backoff. Caller holds `lifecycle`.
    async fn run_start_cycle(&self) -> Result<(), SupervisorError> {
        let max_attempts = self.config.max_restart_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if self.cancel.is_cancelled() {
                return Err(SupervisorError::Stopped(self.spec.id.clone()));
            }

            match self.start_once().await {
                Ok(handle) => {
                    self.restart_attempts.store(0, Ordering::SeqCst);
                    info!(
                        plugin_id = %self.spec.id,
                        generation = handle.generation,
                        hooks = handle.hooks.len(),
                        "Plugin running"
                    );
                    self.handle_tx.send_replace(Some(handle));
                    self.set_state(PluginState::Running);
                    return Ok(());
                }
                Err(err) => {
                    self.restart_attempts.store(attempt, Ordering::SeqCst);
                    warn!(
                        plugin_id = %self.spec.id,
                        attempt,
                        max_attempts,
                        error = %err,
                        "Plugin start attempt failed"
                    );
                    *self.last_failure.write().await = Some(err.to_string());
                    self.set_state(PluginState::Stopped);

                    if !err.is_retryable() {
                        self.mark_failed().await;
                        return Err(err);
                    }
                    last_error = err.to_string();

                    if attempt < max_attempts {
                        let delay = self.config.backoff_for(attempt);
                        tokio::select! {
                            _ = self.cancel.cancelled() => {
                                return Err(SupervisorError::Stopped(self.spec.id.clone()));
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }

        error!(
            plugin_id = %self.spec.id,
            attempts = max_attempts,
            "Plugin start attempts exhausted, marking as failed"
        );
        self.mark_failed().await;
        Err(SupervisorError::Exhausted {
            plugin_id: self.spec.id.clone(),
            attempts: max_attempts,
            last_error,
        })
    }

    async fn mark_failed(&self) {
        self.hook_registry.unregister_plugin(&self.spec.id).await;
        self.set_state(PluginState::Failed);
    }

    /// One spawn + handshake + activate attempt.
    async fn start_once(&self) -> Result<Arc<ProcessHandle>, SupervisorError> {
        let plugin_id = self.spec.id.clone();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        self.set_state(PluginState::Starting);
        let launched =
            self.launcher
                .launch(&self.spec)
                .await
                .map_err(|source| SupervisorError::Launch {
                    plugin_id: plugin_id.clone(),
                    source,
                })?;
        let mut process = launched.process;

        self.set_state(PluginState::Handshaking);
        let mut transport = Transport::new(launched.reader, launched.writer, self.max_frame_bytes);
        let declared = match accept_handshake(
            &mut transport,
            &plugin_id,
            generation,
            self.config.handshake_timeout(),
        )
        .await
        {
            Ok(declared) => declared,
            Err(source) => {
                if let Err(err) = process.kill().await {
                    debug!(plugin_id = %plugin_id, error = %err, "Kill after failed handshake");
                }
                return Err(SupervisorError::Handshake { plugin_id, source });
            }
        };

        let peer = RpcPeer::spawn(
            transport,
            Arc::clone(&self.handlers),
            PeerOptions::new(plugin_id.clone(), generation).with_liveness(self.liveness_tx.clone()),
        );
        let hooks = self.hook_registry.register_plugin(&plugin_id, &declared).await;
        let handle = Arc::new(ProcessHandle {
            generation,
            started_at: Utc::now(),
            running_since: Instant::now(),
            peer,
            process: Mutex::new(process),
            hooks,
        });

        if handle.hooks.contains(&HookName::OnActivate) {
            let activation = handle
                .peer
                .call(
                    HookName::OnActivate.method(),
                    Value::Null,
                    self.activate_timeout,
                )
                .await;
            if let Err(source) = activation {
                self.terminate(&handle).await;
                return Err(SupervisorError::Activation { plugin_id, source });
            }
        }

        Ok(handle)
    }

    /// Retires the handle's channel and makes sure the process is gone.
    async fn terminate(&self, handle: &ProcessHandle) {
        handle.peer.retire();
        let mut process = handle.process.lock().await;
        if let Err(err) = process.kill().await {
            debug!(plugin_id = %self.spec.id, error = %err, "Kill returned error");
        }
        if tokio::time::timeout(self.config.shutdown_timeout(), process.wait())
            .await
            .is_err()
        {
            warn!(
                plugin_id = %self.spec.id,
                generation = handle.generation,
                pid = process.pid(),
                "Plugin process did not exit after kill"
            );
        }
    }

    /// Replaces the process of `failed_generation` with a fresh one after a
    /// backoff that grows with the crash streak. Once the streak exceeds
    /// `max_restart_attempts` the plugin is marked failed instead.
    /// A no-op if that generation is no longer current.
    async fn restart(&self, failed_generation: u64, reason: &str) {
        let _lifecycle = self.lifecycle.lock().await;
        if self.cancel.is_cancelled() {
            return;
        }
        let Some(handle) = self.current() else {
            return;
        };
        if handle.generation != failed_generation {
            return;
        }

        warn!(
            plugin_id = %self.spec.id,
            generation = failed_generation,
            reason,
            "Restarting unhealthy plugin"
        );
        self.set_state(PluginState::Unhealthy);
        *self.last_failure.write().await = Some(reason.to_string());
        self.handle_tx.send_replace(None);
        self.terminate(&handle).await;

        let streak = if handle.running_since.elapsed() >= self.config.stable_run() {
            1
        } else {
            self.crash_streak.load(Ordering::SeqCst).saturating_add(1)
        };
        self.crash_streak.store(streak, Ordering::SeqCst);
        if streak > self.config.max_restart_attempts {
            error!(
                plugin_id = %self.spec.id,
                crashes = streak,
                "Plugin keeps crashing, marking as failed"
            );
            self.mark_failed().await;
            return;
        }

        let delay = self.config.backoff_for(streak);
        debug!(plugin_id = %self.spec.id, crashes = streak, ?delay, "Backing off before restart");
        tokio::select! {
            _ = self.cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        self.restarts.fetch_add(1, Ordering::SeqCst);

        if let Err(err) = self.run_start_cycle().await {
            error!(plugin_id = %self.spec.id, error = %err, "Plugin restart failed");
        }
    }

    async fn probe(&self, handle: &ProcessHandle) -> Result<(), RpcError> {
        handle
            .peer
            .call(
                PING_METHOD,
                Value::Null,
                self.config.health_check_timeout(),
            )
            .await
            .map(|_| ())
    }

    async fn health_check(&self) {
        let Some(handle) = self.current() else {
            return;
        };
        if let Err(err) = self.probe(&handle).await {
            self.restart(handle.generation, &format!("health check failed: {err}"))
                .await;
        }
    }

    async fn handle_signal(&self, signal: LivenessSignal) {
        let Some(handle) = self.current() else {
            return;
        };
        if handle.generation != signal.generation() {
            debug!(
                plugin_id = %self.spec.id,
                signal_generation = signal.generation(),
                current_generation = handle.generation,
                "Ignoring liveness signal for stale generation"
            );
            return;
        }

        match signal {
            LivenessSignal::TransportClosed { reason, .. } => {
                self.restart(handle.generation, &reason).await;
            }
            LivenessSignal::Timeout { method, .. } => match self.probe(&handle).await {
                Ok(()) => {
                    debug!(
                        plugin_id = %self.spec.id,
                        method = %method,
                        "Plugin answered health probe after a call timeout"
                    );
                }
                Err(err) => {
                    let reason = format!("call '{method}' timed out and health probe failed: {err}");
                    self.restart(handle.generation, &reason).await;
                }
            },
        }
    }

    async fn monitor_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<LivenessSignal>) {
        let period = self.config.health_check_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => self.health_check().await,
                signal = rx.recv() => match signal {
                    Some(signal) => self.handle_signal(signal).await,
                    None => break,
                },
            }
        }

        debug!(plugin_id = %self.spec.id, "Plugin monitor stopped");
    }
}

impl std::fmt::Debug for PluginSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSupervisor")
            .field("plugin_id", &self.spec.id)
            .field("state", &self.state())
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .finish()
    }
}
