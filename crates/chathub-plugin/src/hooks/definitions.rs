//! Hook names and their typed argument/reply payloads.
//!
//! A hook is invoked over RPC as method `Hooks.<Name>`. Plugins declare the
//! hook names they implement at handshake; the names here are the closed
//! set the server knows how to dispatch.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use chathub_core::types::{SessionId, UserId};
use chathub_entity::Post;

/// Prefix of every hook method on the wire.
pub const HOOK_METHOD_PREFIX: &str = "Hooks.";

/// How the dispatcher sequences a hook across plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookCategory {
    /// Delivered to every subscriber; failures are logged, never short-circuit.
    Lifecycle,
    /// Sequential chain in registration order; a rejection stops the chain.
    Content,
    /// Fire to every subscriber after the fact; no reply is used.
    Notification,
}

/// Every hook the server dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookName {
    /// Plugin has been started and should initialise.
    OnActivate,
    /// Plugin is about to be stopped.
    OnDeactivate,
    /// Plugin configuration was replaced.
    OnConfigurationChange,
    /// A post is about to be stored. May modify or reject it.
    MessageWillBePosted,
    /// A post is about to be edited. May modify or reject the edit.
    MessageWillBeUpdated,
    /// A post was stored.
    MessageHasBeenPosted,
}

impl HookName {
    /// All hooks, in declaration order.
    pub const ALL: [HookName; 6] = [
        Self::OnActivate,
        Self::OnDeactivate,
        Self::OnConfigurationChange,
        Self::MessageWillBePosted,
        Self::MessageWillBeUpdated,
        Self::MessageHasBeenPosted,
    ];

    /// Name as declared in the handshake capability set.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnActivate => "OnActivate",
            Self::OnDeactivate => "OnDeactivate",
            Self::OnConfigurationChange => "OnConfigurationChange",
            Self::MessageWillBePosted => "MessageWillBePosted",
            Self::MessageWillBeUpdated => "MessageWillBeUpdated",
            Self::MessageHasBeenPosted => "MessageHasBeenPosted",
        }
    }

    /// RPC method name used to invoke the hook.
    pub fn method(&self) -> &'static str {
        match self {
            Self::OnActivate => "Hooks.OnActivate",
            Self::OnDeactivate => "Hooks.OnDeactivate",
            Self::OnConfigurationChange => "Hooks.OnConfigurationChange",
            Self::MessageWillBePosted => "Hooks.MessageWillBePosted",
            Self::MessageWillBeUpdated => "Hooks.MessageWillBeUpdated",
            Self::MessageHasBeenPosted => "Hooks.MessageHasBeenPosted",
        }
    }

    /// Dispatch category.
    pub fn category(&self) -> HookCategory {
        match self {
            Self::OnActivate | Self::OnDeactivate | Self::OnConfigurationChange => {
                HookCategory::Lifecycle
            }
            Self::MessageWillBePosted | Self::MessageWillBeUpdated => HookCategory::Content,
            Self::MessageHasBeenPosted => HookCategory::Notification,
        }
    }

    /// Resolves an RPC method name back to a hook.
    pub fn from_method(method: &str) -> Option<Self> {
        method
            .strip_prefix(HOOK_METHOD_PREFIX)
            .and_then(|name| name.parse().ok())
    }
}

impl fmt::Display for HookName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|hook| hook.as_str() == s)
            .ok_or_else(|| format!("Unknown hook '{s}'"))
    }
}

/// Request context passed along with content and notification hooks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookContext {
    /// Identifier of the originating request.
    pub request_id: String,
    /// Session that issued the request, if any.
    pub session_id: Option<SessionId>,
    /// Acting user, if any.
    pub user_id: Option<UserId>,
}

impl HookContext {
    /// Context with a fresh request id.
    pub fn new() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            session_id: None,
            user_id: None,
        }
    }

    /// Sets the acting user.
    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Sets the session.
    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

/// Arguments of `Hooks.OnConfigurationChange`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationChangeArgs {
    /// Monotonic revision of the blob for this plugin.
    pub revision: u64,
    /// The complete new configuration blob.
    pub config: Value,
}

/// Arguments of `Hooks.MessageWillBePosted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageWillBePostedArgs {
    /// Request context.
    pub context: HookContext,
    /// The post as modified by earlier plugins in the chain.
    pub post: Post,
}

/// Arguments of `Hooks.MessageWillBeUpdated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageWillBeUpdatedArgs {
    /// Request context.
    pub context: HookContext,
    /// The edited post as modified by earlier plugins in the chain.
    pub new_post: Post,
    /// The post as currently stored.
    pub old_post: Post,
}

/// Arguments of `Hooks.MessageHasBeenPosted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageHasBeenPostedArgs {
    /// Request context.
    pub context: HookContext,
    /// The stored post.
    pub post: Post,
}

/// Reply of a content hook: `(modified entity or none, rejection reason)`.
///
/// An empty `rejection` means the post is allowed. `post: None` means the
/// plugin made no change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentHookReply {
    /// Replacement post, if the plugin modified it.
    pub post: Option<Post>,
    /// Non-empty to reject.
    #[serde(default)]
    pub rejection: String,
}

impl ContentHookReply {
    /// Allow unchanged.
    pub fn allow() -> Self {
        Self::default()
    }

    /// Allow with modifications.
    pub fn modified(post: Post) -> Self {
        Self {
            post: Some(post),
            rejection: String::new(),
        }
    }

    /// Reject with a user-visible reason.
    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            post: None,
            rejection: reason.into(),
        }
    }

    /// Whether this reply rejects the post.
    pub fn is_rejection(&self) -> bool {
        !self.rejection.is_empty()
    }
}
