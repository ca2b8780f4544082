//! SQLite CommandStore implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::commands::{CommandRecord, CommandStatus, CommandUpdate};
use crate::storage::schema::{Commands, COMMANDS_SCHEMA};
use crate::storage::{from_millis, to_millis, CommandStore, Result, StorageError, StorageSession};

const TERMINAL_STATUSES: [&str; 3] = ["COMPLETED", "FAILED", "EXPIRED"];

/// SQLite implementation of CommandStore.
pub struct SqliteCommandStore {
    pool: SqlitePool,
}

impl SqliteCommandStore {
    /// Create a new SQLite command store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        for statement in COMMANDS_SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<CommandRecord> {
        let id: String = row.get("id");
        let status: String = row.get("status");
        let data: String = row.get("data");
        let sequence: String = row.get("sequence");
        let period_ms: Option<i64> = row.get("period");
        let delay_ms: i64 = row.get("delay");
        let deadline_ms: Option<i64> = row.get("deadline_at");
        let ready_ms: i64 = row.get("ready_at");
        let started_ms: Option<i64> = row.get("started_at");
        let transactional: i64 = row.get("transactional");
        let retries: Option<i64> = row.get("retries");
        let parent_id: Option<String> = row.get("parent_id");
        let created_ms: i64 = row.get("created_at");

        Ok(CommandRecord {
            id: Uuid::parse_str(&id)?,
            name: row.get("name"),
            data: serde_json::from_str(&data)?,
            status: status.parse()?,
            sequence: serde_json::from_str(&sequence)?,
            period: period_ms.map(millis_to_duration).transpose()?,
            delay: millis_to_duration(delay_ms)?,
            deadline_at: deadline_ms.map(from_millis).transpose()?,
            ready_at: from_millis(ready_ms)?,
            started_at: started_ms.map(from_millis).transpose()?,
            transactional: transactional != 0,
            retries: retries
                .map(|r| {
                    u32::try_from(r).map_err(|_| StorageError::InvalidField {
                        field: "retries",
                        value: r.to_string(),
                    })
                })
                .transpose()?,
            message: row.get("message"),
            parent_id: parent_id.map(|p| Uuid::parse_str(&p)).transpose()?,
            created_at: from_millis(created_ms)?,
        })
    }
}

fn millis_to_duration(ms: i64) -> Result<std::time::Duration> {
    let ms = u64::try_from(ms).map_err(|_| StorageError::InvalidField {
        field: "duration",
        value: ms.to_string(),
    })?;
    Ok(std::time::Duration::from_millis(ms))
}

#[async_trait]
impl CommandStore for SqliteCommandStore {
    async fn create(&self, session: &mut StorageSession, record: &CommandRecord) -> Result<()> {
        let query = Query::insert()
            .into_table(Commands::Table)
            .columns([
                Commands::Id,
                Commands::Name,
                Commands::Data,
                Commands::Status,
                Commands::Sequence,
                Commands::Period,
                Commands::Delay,
                Commands::DeadlineAt,
                Commands::ReadyAt,
                Commands::StartedAt,
                Commands::Transactional,
                Commands::Retries,
                Commands::Message,
                Commands::ParentId,
                Commands::CreatedAt,
            ])
            .values_panic([
                record.id.to_string().into(),
                record.name.clone().into(),
                serde_json::to_string(&record.data)?.into(),
                record.status.as_str().into(),
                serde_json::to_string(&record.sequence)?.into(),
                record.period.map(|p| p.as_millis() as i64).into(),
                (record.delay.as_millis() as i64).into(),
                record.deadline_at.map(to_millis).into(),
                to_millis(record.ready_at).into(),
                record.started_at.map(to_millis).into(),
                (record.transactional as i64).into(),
                record.retries.map(|r| r as i64).into(),
                record.message.clone().into(),
                record.parent_id.map(|p| p.to_string()).into(),
                to_millis(record.created_at).into(),
            ])
            .to_string(SqliteQueryBuilder);

        session.execute(&query).await?;
        Ok(())
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<CommandRecord>> {
        let now_ms = to_millis(now);

        // Single statement so concurrent claimers can never return the
        // same row twice: the subquery and the status flip are atomic.
        let eligible = Query::select()
            .column(Commands::Id)
            .from(Commands::Table)
            .and_where(Expr::col(Commands::Status).eq(CommandStatus::Pending.as_str()))
            .and_where(Expr::col(Commands::ReadyAt).lte(now_ms))
            .order_by(Commands::ReadyAt, Order::Asc)
            .limit(limit as u64)
            .to_owned();

        let query = Query::update()
            .table(Commands::Table)
            .value(Commands::Status, CommandStatus::Running.as_str())
            .value(Commands::StartedAt, now_ms)
            .and_where(Expr::col(Commands::Id).in_subquery(eligible))
            .returning_all()
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(Self::record_from_row(row)?);
        }
        Ok(records)
    }

    async fn update(
        &self,
        session: &mut StorageSession,
        id: Uuid,
        update: &CommandUpdate,
    ) -> Result<()> {
        let mut query = Query::update();
        query
            .table(Commands::Table)
            .and_where(Expr::col(Commands::Id).eq(id.to_string()));

        if let Some(status) = update.status {
            query.value(Commands::Status, status.as_str());
        }
        if let Some(ready_at) = update.ready_at {
            query.value(Commands::ReadyAt, to_millis(ready_at));
        }
        if let Some(started_at) = update.started_at {
            query.value(Commands::StartedAt, to_millis(started_at));
        }
        if let Some(retries) = update.retries {
            query.value(Commands::Retries, retries as i64);
        }
        if let Some(ref message) = update.message {
            query.value(Commands::Message, message.clone());
        }
        if let Some(ref data) = update.data {
            query.value(Commands::Data, serde_json::to_string(data)?);
        }

        session.execute(&query.to_string(SqliteQueryBuilder)).await?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<CommandRecord>> {
        let query = Query::select()
            .expr(Expr::asterisk())
            .from(Commands::Table)
            .and_where(Expr::col(Commands::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn find_by_name(&self, name: &str) -> Result<Vec<CommandRecord>> {
        let query = Query::select()
            .expr(Expr::asterisk())
            .from(Commands::Table)
            .and_where(Expr::col(Commands::Name).eq(name))
            .order_by(Commands::CreatedAt, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(Self::record_from_row).collect()
    }

    async fn find_by_status(&self, status: CommandStatus) -> Result<Vec<CommandRecord>> {
        let query = Query::select()
            .expr(Expr::asterisk())
            .from(Commands::Table)
            .and_where(Expr::col(Commands::Status).eq(status.as_str()))
            .order_by(Commands::ReadyAt, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(Self::record_from_row).collect()
    }

    async fn count_by_status(&self, status: CommandStatus) -> Result<u64> {
        let query = Query::select()
            .expr(Expr::col(Commands::Id).count())
            .from(Commands::Table)
            .and_where(Expr::col(Commands::Status).eq(status.as_str()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_one(&self.pool).await?;
        let count: i64 = row.get(0);
        Ok(count as u64)
    }

    async fn delete_by_name(&self, name: &str) -> Result<u64> {
        let query = Query::delete()
            .from_table(Commands::Table)
            .and_where(Expr::col(Commands::Name).eq(name))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn delete_finalized_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let query = Query::delete()
            .from_table(Commands::Table)
            .and_where(Expr::col(Commands::Status).is_in(TERMINAL_STATUSES))
            .and_where(Expr::col(Commands::CreatedAt).lt(to_millis(cutoff)))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn requeue_interrupted(&self) -> Result<u64> {
        let query = Query::update()
            .table(Commands::Table)
            .value(Commands::Status, CommandStatus::Pending.as_str())
            .and_where(Expr::col(Commands::Status).eq(CommandStatus::Running.as_str()))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
