//! Command store interface.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Result, StorageSession};
use crate::commands::{CommandRecord, CommandStatus, CommandUpdate};

/// Interface for command persistence.
///
/// The atomic claim ([`CommandStore::claim_due`]) is the only concurrency
/// primitive the engine depends on: it flips eligible PENDING rows to
/// RUNNING in a single statement so concurrent dispatch attempts never
/// double-claim a record.
///
/// Write operations take a [`StorageSession`] so they can participate in an
/// open transaction when a command is marked transactional.
#[async_trait]
pub trait CommandStore: Send + Sync {
    /// Insert a fully-populated record.
    async fn create(&self, session: &mut StorageSession, record: &CommandRecord) -> Result<()>;

    /// Atomically claim up to `limit` records with `status = PENDING` and
    /// `ready_at <= now`, transitioning them to RUNNING with
    /// `started_at = now`, and return them.
    async fn claim_due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<CommandRecord>>;

    /// Apply a partial update to one record.
    async fn update(
        &self,
        session: &mut StorageSession,
        id: Uuid,
        update: &CommandUpdate,
    ) -> Result<()>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<CommandRecord>>;

    /// All records under a name, for handler-internal idempotency checks.
    async fn find_by_name(&self, name: &str) -> Result<Vec<CommandRecord>>;

    async fn find_by_status(&self, status: CommandStatus) -> Result<Vec<CommandRecord>>;

    /// Number of records currently in a status, for telemetry.
    async fn count_by_status(&self, status: CommandStatus) -> Result<u64>;

    /// Remove every record under a name. Used to reseed permanent commands
    /// at boot.
    async fn delete_by_name(&self, name: &str) -> Result<u64>;

    /// Remove terminal (COMPLETED/FAILED/EXPIRED) records created before
    /// the cutoff. Returns the number of rows removed.
    async fn delete_finalized_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Flip records left RUNNING by a crash back to PENDING so the next
    /// scheduler tick picks them up. Returns the number of rows requeued.
    async fn requeue_interrupted(&self) -> Result<u64>;
}
