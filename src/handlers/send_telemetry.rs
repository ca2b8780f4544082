//! Periodic telemetry report.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use crate::commands::{
    CommandError, CommandHandler, CommandRecord, CommandTemplate, ExecutionContext, Outcome,
    Result,
};
use crate::commands::CommandStatus;

const NAME: &str = "sendTelemetryCommand";

/// POSTs command throughput counters to a configured endpoint.
///
/// Network failures are absorbed here rather than surfaced as command
/// failures: a missed report is not worth a retry cascade, the next period
/// covers it.
pub struct SendTelemetryHandler {
    endpoint: String,
    period: Duration,
    client: reqwest::Client,
}

impl SendTelemetryHandler {
    pub fn new(endpoint: String, period: Duration) -> Self {
        Self {
            endpoint,
            period,
            client: reqwest::Client::new(),
        }
    }

    async fn report(&self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        let mut counts = serde_json::Map::new();
        for status in [
            CommandStatus::Pending,
            CommandStatus::Running,
            CommandStatus::Completed,
            CommandStatus::Failed,
            CommandStatus::Expired,
        ] {
            let count = ctx.commands.count_by_status(status).await?;
            counts.insert(status.to_string(), json!(count));
        }

        let body = json!({
            "timestamp": ctx.now.timestamp_millis(),
            "commands": counts,
        });

        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CommandError::Handler(format!(
                "telemetry endpoint returned {status}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CommandHandler for SendTelemetryHandler {
    fn name(&self) -> &'static str {
        NAME
    }

    fn permanent(&self) -> bool {
        true
    }

    fn default_template(&self) -> CommandTemplate {
        CommandTemplate::new(NAME).with_period(self.period)
    }

    async fn execute(
        &self,
        _record: &mut CommandRecord,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<Outcome> {
        match self.report(ctx).await {
            Ok(()) => debug!(endpoint = %self.endpoint, "telemetry report sent"),
            Err(e) => warn!(endpoint = %self.endpoint, error = %e, "telemetry report failed"),
        }
        Ok(Outcome::repeat())
    }

    async fn recover(
        &self,
        _record: &mut CommandRecord,
        _error: &CommandError,
        _ctx: &mut ExecutionContext<'_>,
    ) -> Result<Outcome> {
        // A permanent command must stay scheduled even after an unexpected
        // failure.
        Ok(Outcome::repeat())
    }
}
