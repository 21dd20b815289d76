//! Restricted server API exposed to plugins.

pub mod bridge;
pub mod methods;
pub mod services;

pub use bridge::{ApiBridge, PluginGrant};
pub use methods::{
    API_METHOD_PREFIX, ApiMethod, ApiPermission, LogLevel, LogMessageArgs,
    PluginConfigurationReply, ProfileImageReply, UserLookupArgs,
};
pub use services::{InMemoryUserService, UserService, default_profile_image};
