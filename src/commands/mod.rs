//! Durable command engine.
//!
//! A command is a persisted unit of deferred, possibly retried work. Every
//! externally visible behavior of the node (publishing a graph, answering a
//! litigation challenge, paying out a contract, polling for a blockchain
//! event) is scheduled as a command and driven by [`CommandExecutor`].
//!
//! The engine guarantees at-least-once execution: a crash between a handler
//! side effect and the status write causes re-invocation, so handlers must
//! check idempotency conditions against domain state before acting.

mod executor;
mod handler;
mod registry;

pub use executor::CommandExecutor;
pub use handler::{CommandHandler, ExecutionContext};
pub use registry::HandlerRegistry;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::storage::StorageError;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, CommandError>;

/// Errors surfaced by the command engine and its handlers.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// No handler is registered under this name. Fatal configuration error:
    /// the scheduler refuses to run rather than failing records one by one.
    #[error("no handler registered for command '{0}'")]
    UnresolvedHandler(String),

    #[error("handler '{0}' is already registered")]
    DuplicateHandler(String),

    #[error("invalid command template: {0}")]
    InvalidTemplate(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Business-level failure raised by a handler; routed to `recover()`.
    #[error("{0}")]
    Handler(String),
}

/// Lifecycle state of a command record.
///
/// `Completed`, `Failed` and `Expired` are terminal; successors are always
/// new records, never a reused row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Expired,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "PENDING",
            CommandStatus::Running => "RUNNING",
            CommandStatus::Completed => "COMPLETED",
            CommandStatus::Failed => "FAILED",
            CommandStatus::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommandStatus::Completed | CommandStatus::Failed | CommandStatus::Expired
        )
    }
}

impl std::str::FromStr for CommandStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(CommandStatus::Pending),
            "RUNNING" => Ok(CommandStatus::Running),
            "COMPLETED" => Ok(CommandStatus::Completed),
            "FAILED" => Ok(CommandStatus::Failed),
            "EXPIRED" => Ok(CommandStatus::Expired),
            other => Err(StorageError::InvalidField {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted unit of work.
///
/// All timing state (`ready_at`, `deadline_at`, `retries`) lives on the
/// record, never in process memory, so the schedule survives restarts.
#[derive(Debug, Clone)]
pub struct CommandRecord {
    pub id: Uuid,
    /// Selects the handler via the registry. Stable across upgrades:
    /// renaming a handler orphans every persisted record under the old name.
    pub name: String,
    /// Handler payload in its packed (persistence-safe) representation,
    /// except while a handler executes, when it holds the unpacked form.
    pub data: Value,
    pub status: CommandStatus,
    /// Remaining pipeline step names after this one.
    pub sequence: Vec<String>,
    /// Interval used by `repeat`/`retry` rescheduling.
    pub period: Option<Duration>,
    /// Offset from creation to first eligibility.
    pub delay: Duration,
    /// Once passed, the next dispatch invokes `expired()` instead of
    /// `execute()`. Cooperative: a record already running is not interrupted.
    pub deadline_at: Option<DateTime<Utc>>,
    pub ready_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    /// Whether handler side effects and the status write commit atomically.
    pub transactional: bool,
    /// Remaining retry budget; consumed only by `retry()` outcomes.
    pub retries: Option<u32>,
    /// Human-readable failure reason, set on FAILED transitions.
    pub message: Option<String>,
    pub parent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Template for enqueuing a new command.
///
/// Produced by a handler's [`CommandHandler::default_template`] and merged
/// with caller overrides via the `with_*` builders before being handed to
/// [`CommandExecutor::add`].
#[derive(Debug, Clone)]
pub struct CommandTemplate {
    pub name: String,
    pub data: Value,
    pub sequence: Vec<String>,
    pub period: Option<Duration>,
    pub delay: Duration,
    pub deadline_at: Option<DateTime<Utc>>,
    pub transactional: bool,
    pub retries: Option<u32>,
    pub parent_id: Option<Uuid>,
}

impl CommandTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: Value::Object(serde_json::Map::new()),
            sequence: Vec::new(),
            period: None,
            delay: Duration::ZERO,
            deadline_at: None,
            transactional: false,
            retries: None,
            parent_id: None,
        }
    }

    /// Template with no name: the first sequence entry becomes the name at
    /// insert time, the remainder the new record's sequence.
    pub fn from_sequence(sequence: Vec<String>) -> Self {
        let mut template = Self::new("");
        template.sequence = sequence;
        template
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_sequence(mut self, sequence: Vec<String>) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = Some(period);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_deadline(mut self, deadline_at: DateTime<Utc>) -> Self {
        self.deadline_at = Some(deadline_at);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn transactional(mut self) -> Self {
        self.transactional = true;
        self
    }

    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Shallow-merge `data` over the template's payload. Carried pipeline
    /// data overrides handler defaults key by key.
    pub fn merge_data(mut self, data: Value) -> Self {
        self.data = merge_values(self.data, data);
        self
    }
}

/// Partial update applied to a persisted command record.
#[derive(Debug, Clone, Default)]
pub struct CommandUpdate {
    pub status: Option<CommandStatus>,
    pub ready_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub retries: Option<u32>,
    pub message: Option<String>,
    pub data: Option<Value>,
}

impl CommandUpdate {
    pub fn status(status: CommandStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

/// Directive a handler returns to tell the executor what happens next.
///
/// This fixed vocabulary is the only way handlers influence scheduling.
#[derive(Debug)]
pub enum Outcome {
    /// Terminal success; any children are persisted as fresh PENDING records
    /// (fan-out). An empty list is plain completion.
    Completed { children: Vec<CommandTemplate> },
    /// Reschedule the same record at `now + period`; `retries` untouched.
    Repeat,
    /// Reschedule at `now + period` and consume one retry; an exhausted
    /// budget produces a terminal FAILED transition instead.
    Retry,
    /// Pop the first name off `sequence` and spawn one successor of that
    /// name carrying `data`; the current record becomes COMPLETED.
    ContinueSequence { data: Value, sequence: Vec<String> },
}

impl Outcome {
    /// Terminal success, no successors.
    pub fn empty() -> Self {
        Outcome::Completed {
            children: Vec::new(),
        }
    }

    /// Fan out into new PENDING records.
    pub fn spawn(children: Vec<CommandTemplate>) -> Self {
        Outcome::Completed { children }
    }

    pub fn repeat() -> Self {
        Outcome::Repeat
    }

    pub fn retry() -> Self {
        Outcome::Retry
    }

    /// Continue a pipeline. An empty sequence degrades to [`Outcome::empty`].
    pub fn continue_sequence(data: Value, sequence: Vec<String>) -> Self {
        if sequence.is_empty() {
            Self::empty()
        } else {
            Outcome::ContinueSequence { data, sequence }
        }
    }
}

/// Shallow JSON object merge; `over` keys win. Non-object values replace.
pub(crate) fn merge_values(base: Value, over: Value) -> Value {
    match (base, over) {
        (Value::Object(mut base), Value::Object(over)) => {
            for (k, v) in over {
                base.insert(k, v);
            }
            Value::Object(base)
        }
        (base, Value::Null) => base,
        (_, over) => over,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_round_trip() {
        for status in [
            CommandStatus::Pending,
            CommandStatus::Running,
            CommandStatus::Completed,
            CommandStatus::Failed,
            CommandStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<CommandStatus>().unwrap(), status);
        }
        assert!("STARTED".parse::<CommandStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!CommandStatus::Pending.is_terminal());
        assert!(!CommandStatus::Running.is_terminal());
        assert!(CommandStatus::Completed.is_terminal());
        assert!(CommandStatus::Failed.is_terminal());
        assert!(CommandStatus::Expired.is_terminal());
    }

    #[test]
    fn test_template_builders() {
        let deadline = Utc::now();
        let template = CommandTemplate::new("publishCommand")
            .with_data(json!({"datasetId": "0xabc"}))
            .with_period(Duration::from_secs(5))
            .with_delay(Duration::from_millis(100))
            .with_deadline(deadline)
            .with_retries(3)
            .transactional();

        assert_eq!(template.name, "publishCommand");
        assert_eq!(template.period, Some(Duration::from_secs(5)));
        assert_eq!(template.delay, Duration::from_millis(100));
        assert_eq!(template.deadline_at, Some(deadline));
        assert_eq!(template.retries, Some(3));
        assert!(template.transactional);
    }

    #[test]
    fn test_merge_data_overrides_defaults() {
        let template = CommandTemplate::new("x")
            .with_data(json!({"a": 1, "b": 2}))
            .merge_data(json!({"b": 3, "c": 4}));
        assert_eq!(template.data, json!({"a": 1, "b": 3, "c": 4}));
    }

    #[test]
    fn test_merge_data_null_keeps_defaults() {
        let template = CommandTemplate::new("x")
            .with_data(json!({"a": 1}))
            .merge_data(Value::Null);
        assert_eq!(template.data, json!({"a": 1}));
    }

    #[test]
    fn test_continue_sequence_empty_is_terminal() {
        match Outcome::continue_sequence(json!({}), vec![]) {
            Outcome::Completed { children } => assert!(children.is_empty()),
            other => panic!("expected Completed, got {:?}", other),
        }
    }
}
