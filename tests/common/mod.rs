//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::SqlitePool;
use uuid::Uuid;

use kgnode::commands::{CommandRecord, CommandStatus};
use kgnode::config::{Config, StorageConfig};
use kgnode::storage::{init_storage, CommandStore, OperationStore};

pub async fn setup_stores() -> (Arc<dyn CommandStore>, Arc<dyn OperationStore>, SqlitePool) {
    init_storage(&StorageConfig {
        path: ":memory:".to_string(),
    })
    .await
    .expect("Failed to initialize storage")
}

/// Config with a fast tick so tests settle quickly.
pub fn test_config() -> Config {
    Config::for_test()
}

/// A fully-populated PENDING record ready for insertion.
pub fn make_record(name: &str, ready_at: DateTime<Utc>) -> CommandRecord {
    let now = Utc::now();
    CommandRecord {
        id: Uuid::new_v4(),
        name: name.to_string(),
        data: json!({}),
        status: CommandStatus::Pending,
        sequence: Vec::new(),
        period: None,
        delay: Duration::ZERO,
        deadline_at: None,
        ready_at,
        started_at: None,
        transactional: false,
        retries: None,
        message: None,
        parent_id: None,
        created_at: now,
    }
}

/// Poll `check` until it returns true or the timeout elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
