//! Inbound call handlers.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use chathub_core::AppError;

use super::peer::RpcPeer;

/// Context passed to every inbound call handler.
#[derive(Clone)]
pub struct CallContext {
    /// The peer the call arrived on. Handlers may issue calls back through it.
    pub peer: Arc<RpcPeer>,
}

impl CallContext {
    /// Identity bound to the channel the call arrived on.
    pub fn channel_label(&self) -> &str {
        self.peer.label()
    }
}

/// Handler for one inbound method.
#[async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    /// Handles a call and produces its reply.
    async fn handle(&self, ctx: CallContext, args: Value) -> Result<Value, AppError>;
}

/// Adapter turning an async closure into an [`RpcHandler`].
struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> RpcHandler for FnHandler<F>
where
    F: Fn(CallContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, AppError>> + Send + 'static,
{
    async fn handle(&self, ctx: CallContext, args: Value) -> Result<Value, AppError> {
        (self.f)(ctx, args).await
    }
}

/// Method name → handler.
#[derive(Default)]
pub struct HandlerTable {
    handlers: DashMap<String, Arc<dyn RpcHandler>>,
}

impl HandlerTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any previous one for `method`.
    pub fn register(&self, method: impl Into<String>, handler: Arc<dyn RpcHandler>) {
        self.handlers.insert(method.into(), handler);
    }

    /// Registers an async closure as the handler for `method`.
    pub fn register_fn<F, Fut>(&self, method: impl Into<String>, f: F)
    where
        F: Fn(CallContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, AppError>> + Send + 'static,
    {
        self.register(method, Arc::new(FnHandler { f }));
    }

    /// Looks up the handler for `method`.
    pub fn get(&self, method: &str) -> Option<Arc<dyn RpcHandler>> {
        self.handlers.get(method).map(|entry| entry.value().clone())
    }

    /// Registered method names.
    pub fn methods(&self) -> Vec<String> {
        self.handlers.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("methods", &self.methods())
            .finish()
    }
}
