//! Periodic cleanup of finalized command records.

use async_trait::async_trait;
use tracing::debug;

use crate::commands::{
    CommandHandler, CommandRecord, CommandTemplate, ExecutionContext, Outcome, Result,
};

const NAME: &str = "commandsCleanerCommand";
const CLEANUP_PERIOD_MS: u64 = 4 * 60 * 60 * 1_000;

/// Deletes COMPLETED, FAILED and EXPIRED command records older than the
/// configured retention window.
pub struct CommandsCleanerHandler {
    retention: chrono::Duration,
}

impl CommandsCleanerHandler {
    pub fn new(retention: chrono::Duration) -> Self {
        Self { retention }
    }
}

#[async_trait]
impl CommandHandler for CommandsCleanerHandler {
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
        let deleted = ctx.commands.delete_finalized_before(cutoff).await?;
        if deleted > 0 {
            debug!(count = deleted, "removed finalized command records");
        }
        Ok(Outcome::repeat())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_template() {
        let handler = CommandsCleanerHandler::new(chrono::Duration::hours(96));
        let template = handler.default_template();
        assert_eq!(template.name, NAME);
        assert!(template.period.is_some());
        assert!(handler.permanent());
    }
}
