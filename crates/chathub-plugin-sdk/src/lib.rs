//! # chathub-plugin-sdk
//!
//! SDK for developing out-of-process ChatHub plugins.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use chathub_plugin_sdk::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SdkError> {
//!     init_logging("info");
//!     let env = PluginEnvironment::from_env()?;
//!
//!     let hooks = HookTable::new().message_will_be_posted(|_api, _ctx, post| async move {
//!         if post.message.contains("forbidden") {
//!             return Ok(ContentHookReply::reject("That word is not allowed"));
//!         }
//!         Ok(ContentHookReply::allow())
//!     });
//!
//!     let options = env.runtime_options();
//!     PluginRuntime::new(env.plugin_id, hooks)
//!         .with_options(options)
//!         .serve_stdio()
//!         .await
//! }
//! ```

pub mod api;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod runtime;

pub use api::ServerApi;
pub use error::SdkError;
pub use hooks::HookTable;
pub use logging::init_logging;
pub use runtime::{PluginEnvironment, PluginRuntime, RuntimeHandle, RuntimeOptions};

/// Prelude for convenient imports.
pub mod prelude {
    pub use chathub_core::types::{ChannelId, PostId, UserId};
    pub use chathub_core::{AppError, AppResult, ErrorKind};
    pub use chathub_entity::{Post, User};
    pub use chathub_plugin::api::LogLevel;
    pub use chathub_plugin::hooks::{ConfigurationChangeArgs, ContentHookReply, HookContext, HookName};

    pub use crate::api::ServerApi;
    pub use crate::error::SdkError;
    pub use crate::hooks::HookTable;
    pub use crate::logging::init_logging;
    pub use crate::runtime::{PluginEnvironment, PluginRuntime, RuntimeHandle, RuntimeOptions};
}
