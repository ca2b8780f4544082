//! Storage implementations.
//!
//! The engine persists two tables: `commands` (the schedule itself) and
//! `operations` (the domain entities handlers mutate so read paths can
//! observe pipeline outcomes). Queries are built with sea-query and executed
//! through sqlx against SQLite.

mod command_store;
mod operation_store;
pub mod schema;
pub mod sqlite;

pub use command_store::CommandStore;
pub use operation_store::{OperationRecord, OperationStatus, OperationStore};
pub use sqlite::{SqliteCommandStore, SqliteOperationStore};

use std::sync::Arc;

use backon::Retryable;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteQueryResult, SqliteRow};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{info, warn};

use crate::config::StorageConfig;
use crate::utils::retry::connection_backoff;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("invalid {field} value: {value}")]
    InvalidField {
        field: &'static str,
        value: String,
    },

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(i64),
}

/// Execution context for store writes: either the shared pool or one open
/// transaction.
///
/// Transactional commands run their handler side effects and the resulting
/// status transition against the same [`StorageSession::Transaction`] so
/// both commit or neither does. Dropping an uncommitted transaction rolls
/// it back.
pub enum StorageSession {
    Pool(SqlitePool),
    Transaction(Transaction<'static, Sqlite>),
}

impl StorageSession {
    /// Session executing each statement directly against the pool.
    pub fn pool(pool: &SqlitePool) -> Self {
        StorageSession::Pool(pool.clone())
    }

    /// Session wrapping one open transaction.
    pub async fn begin(pool: &SqlitePool) -> Result<Self> {
        Ok(StorageSession::Transaction(pool.begin().await?))
    }

    pub fn is_transactional(&self) -> bool {
        matches!(self, StorageSession::Transaction(_))
    }

    pub async fn execute(&mut self, sql: &str) -> Result<SqliteQueryResult> {
        match self {
            StorageSession::Pool(pool) => Ok(sqlx::query(sql).execute(&*pool).await?),
            StorageSession::Transaction(tx) => Ok(sqlx::query(sql).execute(&mut **tx).await?),
        }
    }

    pub async fn fetch_all(&mut self, sql: &str) -> Result<Vec<SqliteRow>> {
        match self {
            StorageSession::Pool(pool) => Ok(sqlx::query(sql).fetch_all(&*pool).await?),
            StorageSession::Transaction(tx) => Ok(sqlx::query(sql).fetch_all(&mut **tx).await?),
        }
    }

    pub async fn fetch_optional(&mut self, sql: &str) -> Result<Option<SqliteRow>> {
        match self {
            StorageSession::Pool(pool) => Ok(sqlx::query(sql).fetch_optional(&*pool).await?),
            StorageSession::Transaction(tx) => {
                Ok(sqlx::query(sql).fetch_optional(&mut **tx).await?)
            }
        }
    }

    /// Commit an open transaction; a no-op for pool sessions.
    pub async fn commit(self) -> Result<()> {
        if let StorageSession::Transaction(tx) = self {
            tx.commit().await?;
        }
        Ok(())
    }

    /// Roll back an open transaction; a no-op for pool sessions.
    pub async fn rollback(self) -> Result<()> {
        if let StorageSession::Transaction(tx) = self {
            tx.rollback().await?;
        }
        Ok(())
    }
}

/// Connect to the configured SQLite database, retrying with exponential
/// backoff, and initialize both stores.
pub async fn init_storage(
    config: &StorageConfig,
) -> Result<(Arc<dyn CommandStore>, Arc<dyn OperationStore>, SqlitePool)> {
    info!(path = %config.path, "initializing storage");

    // Every pooled connection to sqlite::memory: opens a distinct database,
    // so the in-memory path pins a single never-recycled connection.
    if config.path == ":memory:" {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        return init_stores(pool).await;
    }

    let uri = {
        if let Some(parent) = std::path::Path::new(&config.path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StorageError::InvalidField {
                    field: "storage.path",
                    value: format!("{}: {}", config.path, e),
                })?;
            }
        }
        format!("sqlite:{}?mode=rwc", config.path)
    };

    let pool = (|| async { SqlitePool::connect(&uri).await })
        .retry(connection_backoff())
        .notify(|err: &sqlx::Error, delay| {
            warn!(error = %err, retry_in = ?delay, "storage connect failed, retrying");
        })
        .await?;

    init_stores(pool).await
}

async fn init_stores(
    pool: SqlitePool,
) -> Result<(Arc<dyn CommandStore>, Arc<dyn OperationStore>, SqlitePool)> {
    let command_store = Arc::new(SqliteCommandStore::new(pool.clone()));
    command_store.init().await?;

    let operation_store = Arc::new(SqliteOperationStore::new(pool.clone()));
    operation_store.init().await?;

    Ok((command_store, operation_store, pool))
}

/// Convert a timestamp to the unix-millisecond representation stored in SQLite.
pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// Parse a stored unix-millisecond timestamp.
pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or(StorageError::InvalidTimestamp(ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_round_trip() {
        let now = Utc::now();
        let restored = from_millis(to_millis(now)).unwrap();
        // Storage granularity is one millisecond.
        assert_eq!(restored.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn test_from_millis_rejects_out_of_range() {
        assert!(from_millis(i64::MAX).is_err());
    }
}
