//! kgnode: durable command execution for a knowledge-graph node.
//!
//! Work in this system is expressed as persisted command records processed
//! by a scheduling executor. Handlers implement the [`commands::CommandHandler`]
//! trait and are resolved by name through a [`commands::HandlerRegistry`];
//! the [`commands::CommandExecutor`] claims due records atomically and drives
//! each through its handler, persisting repeat, retry, fan-out and pipeline
//! transitions back to SQLite.
//!
//! Command submission is fire-and-forget. Callers observe results through
//! the operation records and domain rows handlers write, not through a
//! return channel.

pub mod commands;
pub mod config;
pub mod handlers;
pub mod storage;
pub mod utils;
