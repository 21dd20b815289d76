//! Hook capability table.
//!
//! A plugin declares the hooks it implements by setting them on a
//! [`HookTable`]. The set hooks are exactly the capability set announced at
//! handshake, so the server never calls a hook the plugin does not have.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;

use chathub_core::{AppError, AppResult};
use chathub_entity::Post;
use chathub_plugin::hooks::{
    ConfigurationChangeArgs, ContentHookReply, HookContext, HookName, MessageHasBeenPostedArgs,
    MessageWillBePostedArgs, MessageWillBeUpdatedArgs,
};
use chathub_plugin::rpc::{CallContext, HandlerTable};

use crate::api::ServerApi;

/// `OnActivate` / `OnDeactivate` handler.
pub type LifecycleFn = Arc<dyn Fn(ServerApi) -> BoxFuture<'static, AppResult<()>> + Send + Sync>;

/// `OnConfigurationChange` handler.
pub type ConfigurationFn =
    Arc<dyn Fn(ServerApi, ConfigurationChangeArgs) -> BoxFuture<'static, AppResult<()>> + Send + Sync>;

/// `MessageWillBePosted` handler.
pub type MessageWillBePostedFn = Arc<
    dyn Fn(ServerApi, HookContext, Post) -> BoxFuture<'static, AppResult<ContentHookReply>>
        + Send
        + Sync,
>;

/// `MessageWillBeUpdated` handler: new post, then old post.
pub type MessageWillBeUpdatedFn = Arc<
    dyn Fn(ServerApi, HookContext, Post, Post) -> BoxFuture<'static, AppResult<ContentHookReply>>
        + Send
        + Sync,
>;

/// `MessageHasBeenPosted` handler.
pub type MessageHasBeenPostedFn =
    Arc<dyn Fn(ServerApi, HookContext, Post) -> BoxFuture<'static, AppResult<()>> + Send + Sync>;

/// The hooks a plugin implements.
#[derive(Clone, Default)]
pub struct HookTable {
    on_activate: Option<LifecycleFn>,
    on_deactivate: Option<LifecycleFn>,
    on_configuration_change: Option<ConfigurationFn>,
    message_will_be_posted: Option<MessageWillBePostedFn>,
    message_will_be_updated: Option<MessageWillBeUpdatedFn>,
    message_has_been_posted: Option<MessageHasBeenPostedFn>,
}

impl HookTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `OnActivate`. An error refuses activation and the server
    /// unloads the plugin.
    pub fn on_activate<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ServerApi) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        let handler: LifecycleFn = Arc::new(move |api: ServerApi| f(api).boxed());
        self.on_activate = Some(handler);
        self
    }

    /// Sets `OnDeactivate`.
    pub fn on_deactivate<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ServerApi) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        let handler: LifecycleFn = Arc::new(move |api: ServerApi| f(api).boxed());
        self.on_deactivate = Some(handler);
        self
    }

    /// Sets `OnConfigurationChange`.
    pub fn on_configuration_change<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ServerApi, ConfigurationChangeArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        let handler: ConfigurationFn =
            Arc::new(move |api: ServerApi, args: ConfigurationChangeArgs| f(api, args).boxed());
        self.on_configuration_change = Some(handler);
        self
    }

    /// Sets `MessageWillBePosted`.
    pub fn message_will_be_posted<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ServerApi, HookContext, Post) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<ContentHookReply>> + Send + 'static,
    {
        let handler: MessageWillBePostedFn =
            Arc::new(move |api: ServerApi, ctx: HookContext, post: Post| {
                f(api, ctx, post).boxed()
            });
        self.message_will_be_posted = Some(handler);
        self
    }

    /// Sets `MessageWillBeUpdated`.
    pub fn message_will_be_updated<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ServerApi, HookContext, Post, Post) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<ContentHookReply>> + Send + 'static,
    {
        let handler: MessageWillBeUpdatedFn = Arc::new(
            move |api: ServerApi, ctx: HookContext, new_post: Post, old_post: Post| {
                f(api, ctx, new_post, old_post).boxed()
            },
        );
        self.message_will_be_updated = Some(handler);
        self
    }

    /// Sets `MessageHasBeenPosted`.
    pub fn message_has_been_posted<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ServerApi, HookContext, Post) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        let handler: MessageHasBeenPostedFn =
            Arc::new(move |api: ServerApi, ctx: HookContext, post: Post| {
                f(api, ctx, post).boxed()
            });
        self.message_has_been_posted = Some(handler);
        self
    }

    /// The hooks set on this table, in declaration order.
    pub fn capabilities(&self) -> Vec<HookName> {
        HookName::ALL
            .into_iter()
            .filter(|hook| self.implements(*hook))
            .collect()
    }

    /// Whether `hook` is set.
    pub fn implements(&self, hook: HookName) -> bool {
        match hook {
            HookName::OnActivate => self.on_activate.is_some(),
            HookName::OnDeactivate => self.on_deactivate.is_some(),
            HookName::OnConfigurationChange => self.on_configuration_change.is_some(),
            HookName::MessageWillBePosted => self.message_will_be_posted.is_some(),
            HookName::MessageWillBeUpdated => self.message_will_be_updated.is_some(),
            HookName::MessageHasBeenPosted => self.message_has_been_posted.is_some(),
        }
    }

    /// Registers an inbound handler for every set hook.
    pub(crate) fn install(&self, table: &HandlerTable, api_timeout: Duration) {
        if let Some(h) = self.on_activate.clone() {
            register(table, HookName::OnActivate, api_timeout, move |api, _: Value| {
                let h = Arc::clone(&h);
                async move { h(api).await.map(|()| Value::Null) }
            });
        }
        if let Some(h) = self.on_deactivate.clone() {
            register(table, HookName::OnDeactivate, api_timeout, move |api, _: Value| {
                let h = Arc::clone(&h);
                async move { h(api).await.map(|()| Value::Null) }
            });
        }
        if let Some(h) = self.on_configuration_change.clone() {
            register(
                table,
                HookName::OnConfigurationChange,
                api_timeout,
                move |api, args: ConfigurationChangeArgs| {
                    let h = Arc::clone(&h);
                    async move { h(api, args).await.map(|()| Value::Null) }
                },
            );
        }
        if let Some(h) = self.message_will_be_posted.clone() {
            register(
                table,
                HookName::MessageWillBePosted,
                api_timeout,
                move |api, args: MessageWillBePostedArgs| {
                    let h = Arc::clone(&h);
                    async move { encode(h(api, args.context, args.post).await?) }
                },
            );
        }
        if let Some(h) = self.message_will_be_updated.clone() {
            register(
                table,
                HookName::MessageWillBeUpdated,
                api_timeout,
                move |api, args: MessageWillBeUpdatedArgs| {
                    let h = Arc::clone(&h);
                    async move { encode(h(api, args.context, args.new_post, args.old_post).await?) }
                },
            );
        }
        if let Some(h) = self.message_has_been_posted.clone() {
            register(
                table,
                HookName::MessageHasBeenPosted,
                api_timeout,
                move |api, args: MessageHasBeenPostedArgs| {
                    let h = Arc::clone(&h);
                    async move { h(api, args.context, args.post).await.map(|()| Value::Null) }
                },
            );
        }
    }
}

impl std::fmt::Debug for HookTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookTable")
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

/// Registers `f` for `hook`, decoding its arguments and building the
/// [`ServerApi`] bound to the channel the call arrived on.
fn register<A, F, Fut>(table: &HandlerTable, hook: HookName, api_timeout: Duration, f: F)
where
    A: DeserializeOwned + Send + 'static,
    F: Fn(ServerApi, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult<Value>> + Send + 'static,
{
    let f = Arc::new(f);
    table.register_fn(hook.method(), move |ctx: CallContext, args: Value| {
        let f = Arc::clone(&f);
        async move {
            let args: A = serde_json::from_value(args).map_err(|e| {
                AppError::validation(format!("Invalid arguments for {hook}: {e}"))
                    .at("sdk.hook_dispatch")
            })?;
            f(ServerApi::new(ctx.peer, api_timeout), args).await
        }
    });
}

fn encode(reply: ContentHookReply) -> AppResult<Value> {
    Ok(serde_json::to_value(reply)?)
}
