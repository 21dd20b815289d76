//! # chathub-plugin
//!
//! Out-of-process plugin framework for ChatHub. Provides:
//!
//! - Length-prefixed JSON framing and the plugin handshake
//! - A bidirectional RPC bridge with per-call timeouts and reentrant calls
//! - Process supervision with health checks and restart backoff
//! - Hook registry and dispatcher with per-category sequencing
//! - The permission-scoped server API plugins call back into
//! - Ordered configuration delivery
//! - Manifest discovery and the plugin manager tying it together

pub mod api;
pub mod config_sync;
pub mod hooks;
pub mod manager;
pub mod manifest;
pub mod registry;
pub mod rpc;
pub mod supervisor;
pub mod transport;

pub use api::{ApiBridge, ApiMethod, ApiPermission, InMemoryUserService, UserService};
pub use config_sync::{ConfigDelivery, ConfigSynchronizer, PluginConfigStore};
pub use hooks::{
    ContentDispatchResult, ContentHookReply, HookContext, HookDispatcher, HookName, HookRegistry,
};
pub use manager::PluginManager;
pub use manifest::{PluginManifest, discover_manifests, load_manifest};
pub use registry::{PluginInfo, PluginRegistry};
pub use rpc::{RpcError, RpcPeer};
pub use supervisor::{
    CommandLauncher, PluginLauncher, PluginSpec, PluginState, PluginStatus, PluginSupervisor,
};
pub use transport::{Transport, TransportError};
