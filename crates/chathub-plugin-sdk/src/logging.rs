//! Logging for plugin processes.
//!
//! Stdout carries the RPC channel, so plugin logs go to stderr. The server
//! re-emits each stderr line in its own log tagged with the plugin id.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the plugin's log filter.
pub const LOG_FILTER_ENV: &str = "CHATHUB_PLUGIN_LOG";

/// Installs a plain-text stderr subscriber. Does nothing if one is already
/// installed.
pub fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .try_init();
}
