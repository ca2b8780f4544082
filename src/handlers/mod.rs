//! Built-in command handlers.
//!
//! Housekeeping commands that every node runs: cleaners for finalized
//! command and operation records, and the periodic telemetry report.
//! All are permanent: they reseed on startup and repeat forever.

mod commands_cleaner;
mod operations_cleaner;
mod send_telemetry;

pub use commands_cleaner::CommandsCleanerHandler;
pub use operations_cleaner::OperationsCleanerHandler;
pub use send_telemetry::SendTelemetryHandler;

use std::sync::Arc;

use crate::commands::{HandlerRegistry, Result};
use crate::config::Config;

/// Registry populated with the built-in housekeeping handlers.
pub fn builtin_registry(config: &Config) -> Result<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(CommandsCleanerHandler::new(
        config.executor.command_retention(),
    )))?;
    registry.register(Arc::new(OperationsCleanerHandler::new(
        config.executor.operation_retention(),
    )))?;
    if let Some(endpoint) = &config.telemetry.endpoint {
        registry.register(Arc::new(SendTelemetryHandler::new(
            endpoint.clone(),
            config.telemetry.period(),
        )))?;
    }
    Ok(registry)
}
