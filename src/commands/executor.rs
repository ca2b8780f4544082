//! Command executor: the scheduler.
//!
//! A single loop per process claims due records on a fixed tick and
//! dispatches each one on its own task, bounded by a semaphore. Ticks are
//! independent: a slow handler never stalls the dispatch of unrelated due
//! records. The only serialization point is the atomic PENDING-to-RUNNING
//! claim, which guarantees at most one in-flight execution per record.
//!
//! Handler failures are contained per record. The one fatal condition is a
//! persisted name with no registered handler: that is a configuration
//! error, and the loop stops rather than failing records one by one.

use std::mem;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, trace, warn};
use uuid::Uuid;

use super::{
    CommandError, CommandHandler, CommandRecord, CommandStatus, CommandTemplate, CommandUpdate,
    ExecutionContext, HandlerRegistry, Outcome, Result,
};
use crate::config::ExecutorSettings;
use crate::storage::{CommandStore, OperationStore, StorageSession};

struct Inner {
    registry: Arc<HandlerRegistry>,
    commands: Arc<dyn CommandStore>,
    operations: Arc<dyn OperationStore>,
    pool: SqlitePool,
    settings: ExecutorSettings,
    semaphore: Arc<Semaphore>,
}

/// Queues and processes commands.
pub struct CommandExecutor {
    inner: Arc<Inner>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CommandExecutor {
    pub fn new(
        pool: SqlitePool,
        commands: Arc<dyn CommandStore>,
        operations: Arc<dyn OperationStore>,
        registry: Arc<HandlerRegistry>,
        settings: ExecutorSettings,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let semaphore = Arc::new(Semaphore::new(settings.parallelism));
        Self {
            inner: Arc::new(Inner {
                registry,
                commands,
                operations,
                pool,
                settings,
                semaphore,
            }),
            shutdown,
            task: Mutex::new(None),
        }
    }

    /// Enqueue a command. Fire-and-forget: the caller gets the record id
    /// back, never a handler result; outcomes are observed through the
    /// domain entities handlers mutate.
    pub async fn add(&self, template: CommandTemplate) -> Result<Uuid> {
        let mut session = StorageSession::pool(&self.inner.pool);
        insert_template(&self.inner, &mut session, template, Utc::now()).await
    }

    /// Reseed permanent commands, requeue work interrupted by a crash, and
    /// start the scheduling loop.
    pub async fn start(&self) -> Result<()> {
        let mut task = self.task.lock().await;
        if task.is_some() {
            warn!("command executor already started");
            return Ok(());
        }

        let mut session = StorageSession::pool(&self.inner.pool);
        for handler in self.inner.registry.permanent_handlers() {
            let name = handler.name();
            self.inner.commands.delete_by_name(name).await?;
            let mut template = handler.default_template();
            template.delay = self.inner.settings.permanent_delay();
            insert_template(&self.inner, &mut session, template, Utc::now()).await?;
            trace!(name = %name, "permanent command seeded");
        }

        let requeued = self.inner.commands.requeue_interrupted().await?;
        if requeued > 0 {
            info!(count = requeued, "requeued commands interrupted by restart");
        }

        let inner = self.inner.clone();
        let shutdown_rx = self.shutdown.subscribe();
        *task = Some(tokio::spawn(run_loop(inner, shutdown_rx)));
        Ok(())
    }

    /// Cooperative shutdown: the loop exits at the next tick and in-flight
    /// dispatches run to completion.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "scheduler task panicked during shutdown");
            }
        }
    }
}

async fn run_loop(inner: Arc<Inner>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = interval(inner.settings.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut in_flight: JoinSet<()> = JoinSet::new();

    info!(
        parallelism = inner.settings.parallelism,
        tick = ?inner.settings.tick_interval(),
        handlers = inner.registry.len(),
        "command executor started"
    );

    'scheduler: loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown_rx.changed() => break,
        }

        while let Some(finished) = in_flight.try_join_next() {
            if let Err(e) = finished {
                error!(error = %e, "command dispatch task panicked");
            }
        }

        let free = inner.semaphore.available_permits();
        if free == 0 {
            continue;
        }

        let due = match inner.commands.claim_due(Utc::now(), free as u32).await {
            Ok(due) => due,
            Err(e) => {
                warn!(error = %e, "failed to claim due commands");
                continue;
            }
        };

        for record in due {
            let handler = match inner.registry.resolve(&record.name) {
                Ok(handler) => handler,
                Err(e) => {
                    error!(
                        name = %record.name,
                        id = %record.id,
                        error = %e,
                        "persisted command has no registered handler, stopping scheduler"
                    );
                    break 'scheduler;
                }
            };

            let permit = match inner.semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    warn!("dispatch permits exhausted mid-tick");
                    break;
                }
            };

            let inner = inner.clone();
            in_flight.spawn(async move {
                dispatch(inner, record, handler).await;
                drop(permit);
            });
        }
    }

    while in_flight.join_next().await.is_some() {}
    info!("command executor stopped");
}

/// Run one claimed record through its handler and persist the transition.
async fn dispatch(inner: Arc<Inner>, mut record: CommandRecord, handler: Arc<dyn CommandHandler>) {
    let now = Utc::now();
    trace!(name = %record.name, id = %record.id, "command started");

    if let Some(deadline) = record.deadline_at {
        if now > deadline {
            expire(&inner, record, handler.as_ref(), now).await;
            return;
        }
    }

    record.data = handler.unpack(mem::take(&mut record.data));

    let mut session = if record.transactional {
        match StorageSession::begin(&inner.pool).await {
            Ok(session) => session,
            Err(e) => {
                error!(name = %record.name, id = %record.id, error = %e, "failed to open transaction");
                fail_record(&inner, &record, format!("failed to open transaction: {e}")).await;
                return;
            }
        }
    } else {
        StorageSession::pool(&inner.pool)
    };

    let result = {
        let mut ctx = ExecutionContext {
            session: &mut session,
            commands: inner.commands.as_ref(),
            operations: inner.operations.as_ref(),
            now,
        };
        handler.execute(&mut record, &mut ctx).await
    };

    match result {
        Ok(outcome) => {
            match apply_outcome(&inner, &mut record, handler.as_ref(), outcome, session, now, None)
                .await
            {
                Ok(()) => trace!(name = %record.name, id = %record.id, "command processed"),
                Err(e) => {
                    error!(name = %record.name, id = %record.id, error = %e, "failed to apply command outcome");
                    fail_record(&inner, &record, e.to_string()).await;
                }
            }
        }
        Err(execute_error) => {
            // Roll back any partial transactional writes before recovering;
            // the recovery transition itself persists outside the failed
            // transaction.
            if let Err(e) = session.rollback().await {
                warn!(id = %record.id, error = %e, "rollback failed");
            }
            error!(
                name = %record.name,
                id = %record.id,
                error = %execute_error,
                "failed to process command"
            );

            let mut session = StorageSession::pool(&inner.pool);
            let recovery = {
                let mut ctx = ExecutionContext {
                    session: &mut session,
                    commands: inner.commands.as_ref(),
                    operations: inner.operations.as_ref(),
                    now,
                };
                handler.recover(&mut record, &execute_error, &mut ctx).await
            };

            match recovery {
                Ok(outcome) => {
                    if let Err(e) = apply_outcome(
                        &inner,
                        &mut record,
                        handler.as_ref(),
                        outcome,
                        session,
                        now,
                        Some(execute_error.to_string()),
                    )
                    .await
                    {
                        error!(id = %record.id, error = %e, "failed to apply recovery outcome");
                        fail_record(&inner, &record, e.to_string()).await;
                    }
                }
                Err(recover_error) => {
                    warn!(
                        name = %record.name,
                        id = %record.id,
                        error = %recover_error,
                        "failed to recover command"
                    );
                    fail_record(&inner, &record, execute_error.to_string()).await;
                }
            }
        }
    }
}

/// Last-resort transition when an outcome cannot be applied: the record
/// must never stay parked RUNNING, so it fails with the triggering error
/// as its message.
async fn fail_record(inner: &Arc<Inner>, record: &CommandRecord, message: String) {
    let mut update = CommandUpdate::status(CommandStatus::Failed);
    update.message = Some(message);
    let mut session = StorageSession::pool(&inner.pool);
    if let Err(e) = inner.commands.update(&mut session, record.id, &update).await {
        error!(name = %record.name, id = %record.id, error = %e, "failed to mark command FAILED");
    }
}

/// Expired path: the record is past its deadline while still PENDING.
/// The record transitions to EXPIRED unconditionally; the handler's
/// `expired()` may fan out cleanup commands but cannot resurrect the record.
async fn expire(
    inner: &Arc<Inner>,
    mut record: CommandRecord,
    handler: &dyn CommandHandler,
    now: DateTime<Utc>,
) {
    warn!(name = %record.name, id = %record.id, "command past deadline, expiring");

    let mut session = StorageSession::pool(&inner.pool);
    let update = CommandUpdate::status(CommandStatus::Expired);
    if let Err(e) = inner.commands.update(&mut session, record.id, &update).await {
        error!(id = %record.id, error = %e, "failed to mark command EXPIRED");
        return;
    }

    record.data = handler.unpack(mem::take(&mut record.data));
    let outcome = {
        let mut ctx = ExecutionContext {
            session: &mut session,
            commands: inner.commands.as_ref(),
            operations: inner.operations.as_ref(),
            now,
        };
        handler.expired(&mut record, &mut ctx).await
    };

    match outcome {
        Ok(Outcome::Completed { children }) => {
            for child in children {
                let child = ensure_parent(child, record.id);
                if let Err(e) = insert_template(inner, &mut session, child, now).await {
                    error!(id = %record.id, error = %e, "failed to spawn expiry follow-up");
                }
            }
        }
        Ok(_) => {
            warn!(name = %record.name, id = %record.id, "expired callback returned a reschedule, ignoring");
        }
        Err(e) => {
            warn!(name = %record.name, id = %record.id, error = %e, "failed to handle expired callback");
        }
    }
}

/// Persist the transition an outcome directive demands, committing the
/// session so transactional side effects land together with it.
async fn apply_outcome(
    inner: &Arc<Inner>,
    record: &mut CommandRecord,
    handler: &dyn CommandHandler,
    outcome: Outcome,
    mut session: StorageSession,
    now: DateTime<Utc>,
    failure_message: Option<String>,
) -> Result<()> {
    match outcome {
        Outcome::Repeat => {
            let period = record.period.unwrap_or(inner.settings.default_period());
            record.data = handler.pack(mem::take(&mut record.data));
            let update = CommandUpdate {
                status: Some(CommandStatus::Pending),
                ready_at: Some(after(now, period)),
                data: Some(record.data.clone()),
                ..Default::default()
            };
            inner.commands.update(&mut session, record.id, &update).await?;
        }
        Outcome::Retry => {
            let remaining = record.retries.unwrap_or(0);
            if remaining <= 1 {
                // Budget exhausted: terminal, and no further dispatch occurs.
                let mut update = CommandUpdate::status(CommandStatus::Failed);
                update.message =
                    Some(failure_message.unwrap_or_else(|| "retry budget exhausted".to_string()));
                if record.retries.is_some() {
                    update.retries = Some(remaining.saturating_sub(1));
                }
                inner.commands.update(&mut session, record.id, &update).await?;
                warn!(name = %record.name, id = %record.id, "retry budget exhausted, command failed");
            } else {
                let period = record.period.unwrap_or(inner.settings.default_period());
                record.data = handler.pack(mem::take(&mut record.data));
                let update = CommandUpdate {
                    status: Some(CommandStatus::Pending),
                    ready_at: Some(after(now, period)),
                    retries: Some(remaining - 1),
                    data: Some(record.data.clone()),
                    ..Default::default()
                };
                inner.commands.update(&mut session, record.id, &update).await?;
            }
        }
        Outcome::Completed { children } => {
            for child in children {
                let child = ensure_parent(child, record.id);
                insert_template(inner, &mut session, child, now).await?;
            }
            let update = CommandUpdate::status(CommandStatus::Completed);
            inner.commands.update(&mut session, record.id, &update).await?;
        }
        Outcome::ContinueSequence { data, mut sequence } => {
            if sequence.is_empty() {
                let update = CommandUpdate::status(CommandStatus::Completed);
                inner.commands.update(&mut session, record.id, &update).await?;
            } else {
                let next = sequence.remove(0);
                let next_handler = inner.registry.resolve(&next)?;
                let template = next_handler
                    .default_template()
                    .merge_data(data)
                    .with_sequence(sequence)
                    .with_parent(record.id);
                insert_template(inner, &mut session, template, now).await?;
                let update = CommandUpdate::status(CommandStatus::Completed);
                inner.commands.update(&mut session, record.id, &update).await?;
            }
        }
    }

    session.commit().await?;
    Ok(())
}

/// Materialize a template into a PENDING record and persist it.
///
/// A nameless template takes its name from the head of its sequence, the
/// remainder becoming the new record's sequence. Payloads are packed by the
/// target handler on the way in.
async fn insert_template(
    inner: &Arc<Inner>,
    session: &mut StorageSession,
    mut template: CommandTemplate,
    now: DateTime<Utc>,
) -> Result<Uuid> {
    if template.name.is_empty() {
        if template.sequence.is_empty() {
            return Err(CommandError::InvalidTemplate(
                "template has neither name nor sequence".to_string(),
            ));
        }
        template.name = template.sequence.remove(0);
    }

    let handler = inner.registry.resolve(&template.name)?;
    let data = handler.pack(template.data);

    let record = CommandRecord {
        id: Uuid::new_v4(),
        name: template.name,
        data,
        status: CommandStatus::Pending,
        sequence: template.sequence,
        period: template.period,
        delay: template.delay,
        deadline_at: template.deadline_at,
        ready_at: after(now, template.delay),
        started_at: None,
        transactional: template.transactional,
        retries: template.retries,
        message: None,
        parent_id: template.parent_id,
        created_at: now,
    };

    inner.commands.create(session, &record).await?;
    trace!(name = %record.name, id = %record.id, ready_at = %record.ready_at, "command created");
    Ok(record.id)
}

fn ensure_parent(template: CommandTemplate, parent_id: Uuid) -> CommandTemplate {
    if template.parent_id.is_some() {
        template
    } else {
        template.with_parent(parent_id)
    }
}

fn after(now: DateTime<Utc>, offset: Duration) -> DateTime<Utc> {
    now + chrono::Duration::from_std(offset).unwrap_or_else(|_| chrono::Duration::zero())
}
