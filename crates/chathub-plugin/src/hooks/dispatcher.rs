//! Hook dispatcher: invokes hooks on plugins and applies the sequencing
//! policy of each hook category.
//!
//! For content hooks:
//! - Plugins are called one at a time in registration order.
//! - Each plugin sees the post as modified by the plugins before it.
//! - A non-empty rejection stops the chain; later plugins are not called.
//! - A hard error (transport, timeout, malformed reply) follows the
//!   configured policy: skip the plugin or reject the post.
//!
//! For lifecycle and notification hooks:
//! - All subscribers are called concurrently.
//! - Failures are logged and collected; they never stop delivery to others.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use chathub_core::config::{ContentErrorPolicy, HookConfig};
use chathub_entity::Post;

use super::definitions::{
    ContentHookReply, HookCategory, HookContext, HookName, MessageHasBeenPostedArgs,
    MessageWillBePostedArgs, MessageWillBeUpdatedArgs,
};
use super::registry::HookRegistry;
use crate::registry::PluginRegistry;
use crate::rpc::RpcError;

/// A plugin that failed to handle a hook.
#[derive(Debug, Clone)]
pub struct HookFailure {
    /// Plugin that failed.
    pub plugin_id: String,
    /// The call failure: a transport or timeout error (a liveness signal),
    /// a reply that did not decode, or an application error from the plugin.
    pub error: RpcError,
}

/// Outcome of delivering a hook to every subscriber.
#[derive(Debug, Clone, Default)]
pub struct BroadcastResult {
    /// Plugins that handled the hook successfully.
    pub delivered: Vec<String>,
    /// Plugins that failed.
    pub failures: Vec<HookFailure>,
}

/// Outcome of running a content hook chain.
#[derive(Debug, Clone)]
pub struct ContentDispatchResult {
    /// Final post. When rejected, the post as the rejecting plugin saw it.
    pub post: Post,
    /// Rejection reason shown to the user, if rejected.
    pub rejection: Option<String>,
    /// Plugin that rejected, if rejected.
    pub rejected_by: Option<String>,
    /// Plugins invoked, in order.
    pub invoked: Vec<String>,
    /// Plugins that failed hard and were skipped (or caused the rejection).
    pub failures: Vec<HookFailure>,
}

impl ContentDispatchResult {
    /// Whether the chain rejected the post.
    pub fn is_rejected(&self) -> bool {
        self.rejection.is_some()
    }
}

/// Dispatches hooks to subscribed plugins.
#[derive(Debug)]
pub struct HookDispatcher {
    /// Hook registry.
    hook_registry: Arc<HookRegistry>,
    /// Loaded plugins.
    plugins: Arc<PluginRegistry>,
    /// Timeouts and error policy.
    config: HookConfig,
}

impl HookDispatcher {
    /// Creates a new hook dispatcher.
    pub fn new(
        hook_registry: Arc<HookRegistry>,
        plugins: Arc<PluginRegistry>,
        config: HookConfig,
    ) -> Self {
        Self {
            hook_registry,
            plugins,
            config,
        }
    }

    /// Returns a reference to the hook registry.
    pub fn registry(&self) -> &Arc<HookRegistry> {
        &self.hook_registry
    }

    fn timeout_for(&self, hook: HookName) -> Duration {
        match hook.category() {
            HookCategory::Content => self.config.content_timeout(),
            HookCategory::Lifecycle | HookCategory::Notification => {
                self.config.lifecycle_timeout()
            }
        }
    }

    /// Invokes `hook` on a single plugin.
    ///
    /// Returns `Ok(None)` without a call if the plugin does not implement
    /// the hook.
    pub async fn invoke(
        &self,
        plugin_id: &str,
        hook: HookName,
        args: Value,
    ) -> Result<Option<Value>, RpcError> {
        if !self.hook_registry.implements(plugin_id, hook).await {
            return Ok(None);
        }
        let supervisor = self
            .plugins
            .get(plugin_id)
            .await
            .ok_or_else(|| RpcError::NotRunning(plugin_id.to_string()))?;

        debug!(hook = %hook, plugin_id = %plugin_id, "Invoking hook");
        supervisor
            .call(hook.method(), args, self.timeout_for(hook))
            .await
            .map(Some)
    }

    /// Delivers `hook` to every subscriber concurrently.
    pub async fn broadcast(&self, hook: HookName, args: Value) -> BroadcastResult {
        let subscribers = self.hook_registry.subscribers(hook).await;
        if subscribers.is_empty() {
            return BroadcastResult::default();
        }

        debug!(hook = %hook, subscribers = subscribers.len(), "Broadcasting hook");

        let calls = subscribers.into_iter().map(|plugin_id| {
            let args = args.clone();
            async move {
                let outcome = self.invoke(&plugin_id, hook, args).await;
                (plugin_id, outcome)
            }
        });

        let mut result = BroadcastResult::default();
        for (plugin_id, outcome) in join_all(calls).await {
            match outcome {
                Ok(_) => result.delivered.push(plugin_id),
                Err(error) => {
                    error!(hook = %hook, plugin_id = %plugin_id, error = %error, "Hook failed");
                    result.failures.push(HookFailure { plugin_id, error });
                }
            }
        }
        result
    }

    /// Runs `MessageWillBePosted` through the content chain.
    pub async fn message_will_be_posted(
        &self,
        context: &HookContext,
        post: Post,
    ) -> ContentDispatchResult {
        self.run_content_chain(HookName::MessageWillBePosted, post, |current| {
            serde_json::to_value(MessageWillBePostedArgs {
                context: context.clone(),
                post: current.clone(),
            })
        })
        .await
    }

    /// Runs `MessageWillBeUpdated` through the content chain.
    pub async fn message_will_be_updated(
        &self,
        context: &HookContext,
        new_post: Post,
        old_post: &Post,
    ) -> ContentDispatchResult {
        self.run_content_chain(HookName::MessageWillBeUpdated, new_post, |current| {
            serde_json::to_value(MessageWillBeUpdatedArgs {
                context: context.clone(),
                new_post: current.clone(),
                old_post: old_post.clone(),
            })
        })
        .await
    }

    /// Notifies every subscriber that a post was stored.
    pub async fn message_has_been_posted(
        &self,
        context: &HookContext,
        post: &Post,
    ) -> BroadcastResult {
        let args = MessageHasBeenPostedArgs {
            context: context.clone(),
            post: post.clone(),
        };
        match serde_json::to_value(args) {
            Ok(args) => self.broadcast(HookName::MessageHasBeenPosted, args).await,
            Err(err) => {
                error!(error = %err, "Failed to encode MessageHasBeenPosted arguments");
                BroadcastResult::default()
            }
        }
    }

    async fn run_content_chain<F>(
        &self,
        hook: HookName,
        post: Post,
        encode_args: F,
    ) -> ContentDispatchResult
    where
        F: Fn(&Post) -> Result<Value, serde_json::Error>,
    {
        let subscribers = self.hook_registry.subscribers(hook).await;
        let mut result = ContentDispatchResult {
            post,
            rejection: None,
            rejected_by: None,
            invoked: Vec::with_capacity(subscribers.len()),
            failures: Vec::new(),
        };

        for plugin_id in subscribers {
            let Some(supervisor) = self.plugins.get(&plugin_id).await else {
                continue;
            };

            let args = match encode_args(&result.post) {
                Ok(args) => args,
                Err(err) => {
                    error!(hook = %hook, error = %err, "Failed to encode hook arguments");
                    break;
                }
            };

            result.invoked.push(plugin_id.clone());
            let reply = supervisor
                .call_typed::<Value, ContentHookReply>(
                    hook.method(),
                    &args,
                    self.config.content_timeout(),
                )
                .await;

            match reply {
                Ok(reply) if reply.is_rejection() => {
                    info!(
                        hook = %hook,
                        plugin_id = %plugin_id,
                        reason = %reply.rejection,
                        "Plugin rejected content"
                    );
                    result.rejection = Some(reply.rejection);
                    result.rejected_by = Some(plugin_id);
                    return result;
                }
                Ok(reply) => {
                    if let Some(modified) = reply.post {
                        debug!(hook = %hook, plugin_id = %plugin_id, "Plugin modified content");
                        result.post = modified;
                    }
                }
                Err(error) => match self.config.content_error_policy {
                    ContentErrorPolicy::Skip => {
                        warn!(
                            hook = %hook,
                            plugin_id = %plugin_id,
                            error = %error,
                            "Content hook failed, continuing without this plugin"
                        );
                        result.failures.push(HookFailure { plugin_id, error });
                    }
                    ContentErrorPolicy::Reject => {
                        warn!(
                            hook = %hook,
                            plugin_id = %plugin_id,
                            error = %error,
                            "Content hook failed, rejecting content"
                        );
                        result.rejection = Some(error.to_string());
                        result.rejected_by = Some(plugin_id.clone());
                        result.failures.push(HookFailure { plugin_id, error });
                        return result;
                    }
                },
            }
        }

        result
    }
}
