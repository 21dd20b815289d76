//! # plugin-word-filter
//!
//! Sample ChatHub plugin. Rejects posts containing blocked words and
//! rewrites configured replacements before a post is stored.
//!
//! Settings (`plugin.json` `settings`, or a later configuration update):
//!
//! ```json
//! {
//!   "blocked_words": ["spam"],
//!   "replacements": { "colour": "color" },
//!   "rejection_message": "Blocked: {word}"
//! }
//! ```

pub mod filter;
pub mod plugin;

pub use filter::{FilterConfig, Verdict, WordFilter};
pub use plugin::{PLUGIN_ID, WordFilterPlugin};
