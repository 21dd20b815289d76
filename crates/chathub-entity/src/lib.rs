//! # chathub-entity
//!
//! Domain entity models for ChatHub that are passed to and returned from
//! plugins. Every struct derives `Debug`, `Clone`, `Serialize` and
//! `Deserialize` so it can travel inside a hook or API call frame.

pub mod post;
pub mod user;

pub use post::Post;
pub use user::{User, UserRole};
