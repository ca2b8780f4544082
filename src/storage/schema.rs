//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Commands table schema.
#[derive(Iden)]
pub enum Commands {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "name"]
    Name,
    #[iden = "data"]
    Data,
    #[iden = "status"]
    Status,
    #[iden = "sequence"]
    Sequence,
    #[iden = "period"]
    Period,
    #[iden = "delay"]
    Delay,
    #[iden = "deadline_at"]
    DeadlineAt,
    #[iden = "ready_at"]
    ReadyAt,
    #[iden = "started_at"]
    StartedAt,
    #[iden = "transactional"]
    Transactional,
    #[iden = "retries"]
    Retries,
    #[iden = "message"]
    Message,
    #[iden = "parent_id"]
    ParentId,
    #[iden = "created_at"]
    CreatedAt,
}

/// Operations table schema.
#[derive(Iden)]
pub enum Operations {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "status"]
    Status,
    #[iden = "message"]
    Message,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Statements creating the commands table and its indexes, executed one at
/// a time at startup.
///
/// Timestamps are unix milliseconds; `data` and `sequence` are JSON text.
pub const COMMANDS_SCHEMA: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS commands (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        data TEXT NOT NULL,
        status TEXT NOT NULL,
        sequence TEXT NOT NULL,
        period INTEGER,
        delay INTEGER NOT NULL DEFAULT 0,
        deadline_at INTEGER,
        ready_at INTEGER NOT NULL,
        started_at INTEGER,
        transactional INTEGER NOT NULL DEFAULT 0,
        retries INTEGER,
        message TEXT,
        parent_id TEXT,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_commands_due ON commands(status, ready_at)",
    "CREATE INDEX IF NOT EXISTS idx_commands_name ON commands(name)",
];

/// Statements creating the operations table and its index.
pub const OPERATIONS_SCHEMA: [&str; 2] = [
    "CREATE TABLE IF NOT EXISTS operations (
        id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        message TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_operations_status ON operations(status, updated_at)",
];
