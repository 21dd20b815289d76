//! ChatHub Server: plugin host
//!
//! Loads configuration, starts every plugin found in the plugin directory
//! and supervises them until shutdown.

use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::{EnvFilter, fmt};

use chathub_core::config::AppConfig;
use chathub_core::einterfaces::Enterprise;
use chathub_core::error::AppError;
use chathub_plugin::{CommandLauncher, InMemoryUserService, PluginManager};

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// Load configuration from `config/` and the environment
fn load_configuration() -> Result<AppConfig, AppError> {
    let env = std::env::var("CHATHUB_ENV").unwrap_or_else(|_| "development".to_string());
    AppConfig::load(&env)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main server run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting ChatHub v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Plugin manager ───────────────────────────────────
    let users = Arc::new(InMemoryUserService::new());
    let enterprise = Enterprise::new();
    tracing::info!(?enterprise, "Enterprise capabilities");
    let manager = PluginManager::new(
        config.plugins.clone(),
        Arc::new(CommandLauncher),
        users,
        enterprise,
    )
    .with_stderr_forwarding(config.logging.forward_plugin_stderr);

    // ── Step 2: Load plugins ─────────────────────────────────────
    if config.plugins.auto_load {
        let directory = Path::new(&config.plugins.directory);
        tracing::info!("Discovering plugins in '{}'...", directory.display());
        let loaded = manager.discover_and_load(directory).await?;
        tracing::info!("{} plugin(s) loaded", loaded.len());
    } else {
        tracing::info!("Plugin auto-load disabled");
    }

    // ── Step 3: Wait for shutdown ────────────────────────────────
    shutdown_signal().await?;
    tracing::info!("Shutdown signal received, stopping plugins...");

    manager.unload_all().await?;

    tracing::info!("ChatHub server shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() -> Result<(), AppError> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).map_err(
                |e| AppError::internal(format!("Failed to install SIGTERM handler: {}", e)),
            )?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.map_err(|e| {
                AppError::internal(format!("Failed to install Ctrl+C handler: {}", e))
            }),
            _ = terminate.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| AppError::internal(format!("Failed to install Ctrl+C handler: {}", e)))
}
