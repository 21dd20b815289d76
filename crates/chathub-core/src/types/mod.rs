//! Shared value types.

pub mod id;

pub use id::{ChannelId, PostId, SessionId, UserId};
