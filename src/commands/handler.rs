//! Command handler contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{CommandError, CommandRecord, CommandTemplate, Outcome, Result};
use crate::storage::{CommandStore, OperationStore, StorageSession};

/// Everything a handler may touch while executing.
///
/// For transactional commands `session` wraps the open transaction; domain
/// writes issued through it commit together with the engine's own status
/// transition, or not at all.
pub struct ExecutionContext<'a> {
    pub session: &'a mut StorageSession,
    pub commands: &'a dyn CommandStore,
    pub operations: &'a dyn OperationStore,
    pub now: DateTime<Utc>,
}

/// Business logic bound to one command name.
///
/// The engine delivers at-least-once: `execute` can run again after a crash
/// that lost the status write, so implementations check idempotency
/// conditions (e.g. "operation already FAILED") and short-circuit to
/// [`Outcome::empty`] rather than redoing side effects.
///
/// Payloads are stored packed: the engine calls [`CommandHandler::unpack`]
/// before `execute` and [`CommandHandler::pack`] before any re-persist
/// (repeat, retry, child creation), so handlers work with domain values and
/// never see the persistence representation.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// The durable name this handler is registered under. A compatibility
    /// contract across upgrades, not an implementation detail.
    fn name(&self) -> &'static str;

    /// Fully-populated template with this command's default scheduling
    /// policy (period, delay, retries, transactional). Callers merge their
    /// overrides onto it; this is the only place defaults live.
    fn default_template(&self) -> CommandTemplate {
        CommandTemplate::new(self.name())
    }

    /// Whether the executor reseeds this command at every boot.
    fn permanent(&self) -> bool {
        false
    }

    /// The step's business logic.
    async fn execute(
        &self,
        command: &mut CommandRecord,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<Outcome>;

    /// Invoked when `execute` fails. The default consumes one retry;
    /// exhaustion (or an absent budget) turns into a terminal FAILED
    /// transition with the error as the record's message.
    async fn recover(
        &self,
        command: &mut CommandRecord,
        error: &CommandError,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<Outcome> {
        let _ = (command, error, ctx);
        Ok(Outcome::retry())
    }

    /// Invoked instead of `execute` once `deadline_at` has passed while the
    /// record was still PENDING. Used to fail dependent domain entities and
    /// release resources reserved by earlier steps.
    async fn expired(
        &self,
        command: &mut CommandRecord,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<Outcome> {
        let _ = (command, ctx);
        Ok(Outcome::empty())
    }

    /// Convert domain values to the persistence-safe representation.
    /// Wide integers and raw hashes do not cross the JSON boundary
    /// losslessly; handlers carrying them encode to strings here.
    fn pack(&self, data: Value) -> Value {
        data
    }

    /// Inverse of [`CommandHandler::pack`].
    fn unpack(&self, data: Value) -> Value {
        data
    }
}
