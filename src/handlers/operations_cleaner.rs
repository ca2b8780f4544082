//! Periodic cleanup of finalized operation records.

use async_trait::async_trait;
use tracing::debug;

use crate::commands::{
    CommandHandler, CommandRecord, CommandTemplate, ExecutionContext, Outcome, Result,
};

const NAME: &str = "operationsCleanerCommand";
const CLEANUP_PERIOD_MS: u64 = 60 * 60 * 1_000;

/// Deletes COMPLETED and FAILED operation records older than the configured
/// retention window.
pub struct OperationsCleanerHandler {
    retention: chrono::Duration,
}

impl OperationsCleanerHandler {
    pub fn new(retention: chrono::Duration) -> Self {
        Self { retention }
    }
}

#[async_trait]
impl CommandHandler for OperationsCleanerHandler {
    fn name(&self) -> &'static str {
        NAME
    }

    fn permanent(&self) -> bool {
        true
    }

    fn default_template(&self) -> CommandTemplate {
        CommandTemplate::new(NAME)
            .with_period(std::time::Duration::from_millis(CLEANUP_PERIOD_MS))
    }

    async fn execute(
        &self,
        _record: &mut CommandRecord,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<Outcome> {
        let cutoff = ctx.now - self.retention;
        let deleted = ctx.operations.delete_finalized_before(cutoff).await?;
        if deleted > 0 {
            debug!(count = deleted, "removed finalized operation records");
        }
        Ok(Outcome::repeat())
    }
}
