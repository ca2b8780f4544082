//! kgnode: knowledge-graph node command engine.
//!
//! Boots storage, registers the built-in handlers, and runs the command
//! executor until interrupted.
//!
//! ## Configuration
//! - First CLI argument or KGNODE_CONFIG: YAML configuration file
//! - KGNODE__STORAGE__PATH: SQLite database path
//! - KGNODE__EXECUTOR__PARALLELISM: concurrent command limit
//! - KGNODE__TELEMETRY__ENDPOINT: optional usage report endpoint
//! - KGNODE_LOG: tracing filter (defaults to "info")

use std::sync::Arc;

use tracing::{error, info};

use kgnode::commands::CommandExecutor;
use kgnode::config::Config;
use kgnode::handlers::builtin_registry;
use kgnode::storage::init_storage;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    kgnode::utils::bootstrap::init_tracing();

    let config_path = kgnode::utils::bootstrap::parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Starting kgnode");

    let (commands, operations, pool) = init_storage(&config.storage).await?;
    info!("Storage initialized");

    let registry = Arc::new(builtin_registry(&config)?);
    info!(handlers = registry.len(), "Handler registry populated");

    let executor = CommandExecutor::new(
        pool,
        commands,
        operations,
        registry,
        config.executor.clone(),
    );
    executor.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    executor.stop().await;

    Ok(())
}
