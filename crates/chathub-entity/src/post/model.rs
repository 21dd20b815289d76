//! Post entity model.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chathub_core::types::{ChannelId, PostId, UserId};

/// A message posted to a channel.
///
/// Content hooks receive a `Post`, may return a modified copy, and the
/// modified copy is what the next plugin in the chain sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    /// Unique post identifier.
    pub id: PostId,
    /// Channel the post belongs to.
    pub channel_id: ChannelId,
    /// Author.
    pub user_id: UserId,
    /// Root post of the thread, if this is a reply.
    pub root_id: Option<PostId>,
    /// Message text.
    pub message: String,
    /// Free-form properties attached by clients and plugins.
    #[serde(default)]
    pub props: HashMap<String, serde_json::Value>,
    /// When the post was created.
    pub created_at: DateTime<Utc>,
    /// When the post was last edited.
    pub updated_at: DateTime<Utc>,
}

impl Post {
    /// Creates a new root post.
    pub fn new(channel_id: ChannelId, user_id: UserId, message: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: PostId::new(),
            channel_id,
            user_id,
            root_id: None,
            message: message.into(),
            props: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if this post is a thread reply.
    pub fn is_reply(&self) -> bool {
        self.root_id.is_some()
    }

    /// Sets a property, replacing any previous value.
    pub fn add_prop(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.props.insert(key.into(), value);
    }
}
