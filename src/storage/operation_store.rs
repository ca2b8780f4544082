//! Operation store interface.
//!
//! Operations are the domain entities through which fire-and-forget command
//! pipelines surface their outcome. No synchronous caller awaits a command;
//! API read paths poll the operation status and message instead.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Result, StorageError, StorageSession};

/// Lifecycle state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    InProgress,
    Completed,
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::InProgress => "IN_PROGRESS",
            OperationStatus::Completed => "COMPLETED",
            OperationStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::InProgress)
    }
}

impl std::str::FromStr for OperationStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "IN_PROGRESS" => Ok(OperationStatus::InProgress),
            "COMPLETED" => Ok(OperationStatus::Completed),
            "FAILED" => Ok(OperationStatus::Failed),
            other => Err(StorageError::InvalidField {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// One tracked operation.
#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub id: Uuid,
    pub status: OperationStatus,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Interface for operation persistence.
#[async_trait]
pub trait OperationStore: Send + Sync {
    /// Insert a new IN_PROGRESS operation.
    async fn create(
        &self,
        session: &mut StorageSession,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Transition an operation, optionally recording a human-readable
    /// message (the failure reason on FAILED).
    async fn update_status(
        &self,
        session: &mut StorageSession,
        id: Uuid,
        status: OperationStatus,
        message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OperationRecord>>;

    /// Remove terminal operations last updated before the cutoff.
    async fn delete_finalized_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}
