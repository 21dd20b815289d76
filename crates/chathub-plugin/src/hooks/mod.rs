//! Hook system: typed hook definitions, the per-hook subscriber registry,
//! and the dispatcher that sequences calls across plugins.

pub mod definitions;
pub mod dispatcher;
pub mod registry;

pub use definitions::{
    ConfigurationChangeArgs, ContentHookReply, HookCategory, HookContext, HookName,
    MessageHasBeenPostedArgs, MessageWillBePostedArgs, MessageWillBeUpdatedArgs,
};
pub use dispatcher::{BroadcastResult, ContentDispatchResult, HookDispatcher, HookFailure};
pub use registry::HookRegistry;
