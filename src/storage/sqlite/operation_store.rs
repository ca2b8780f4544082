//! SQLite OperationStore implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, Query, SqliteQueryBuilder};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::storage::schema::{Operations, OPERATIONS_SCHEMA};
use crate::storage::{
    from_millis, to_millis, OperationRecord, OperationStatus, OperationStore, Result,
    StorageSession,
};

const TERMINAL_STATUSES: [&str; 2] = ["COMPLETED", "FAILED"];

/// SQLite implementation of OperationStore.
pub struct SqliteOperationStore {
    pool: SqlitePool,
}

impl SqliteOperationStore {
    /// Create a new SQLite operation store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        for statement in OPERATIONS_SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<OperationRecord> {
        let id: String = row.get("id");
        let status: String = row.get("status");
        let created_ms: i64 = row.get("created_at");
        let updated_ms: i64 = row.get("updated_at");

        Ok(OperationRecord {
            id: Uuid::parse_str(&id)?,
            status: status.parse()?,
            message: row.get("message"),
            created_at: from_millis(created_ms)?,
            updated_at: from_millis(updated_ms)?,
        })
    }
}

#[async_trait]
impl OperationStore for SqliteOperationStore {
    async fn create(
        &self,
        session: &mut StorageSession,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let query = Query::insert()
            .into_table(Operations::Table)
            .columns([
                Operations::Id,
                Operations::Status,
                Operations::Message,
                Operations::CreatedAt,
                Operations::UpdatedAt,
            ])
            .values_panic([
                id.to_string().into(),
                OperationStatus::InProgress.as_str().into(),
                Option::<String>::None.into(),
                to_millis(now).into(),
                to_millis(now).into(),
            ])
            .to_string(SqliteQueryBuilder);

        session.execute(&query).await?;
        Ok(())
    }

    async fn update_status(
        &self,
        session: &mut StorageSession,
        id: Uuid,
        status: OperationStatus,
        message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut query = Query::update();
        query
            .table(Operations::Table)
            .value(Operations::Status, status.as_str())
            .value(Operations::UpdatedAt, to_millis(now))
            .and_where(Expr::col(Operations::Id).eq(id.to_string()));

        if let Some(message) = message {
            query.value(Operations::Message, message);
        }

        session.execute(&query.to_string(SqliteQueryBuilder)).await?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OperationRecord>> {
        let query = Query::select()
            .expr(Expr::asterisk())
            .from(Operations::Table)
            .and_where(Expr::col(Operations::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn delete_finalized_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let query = Query::delete()
            .from_table(Operations::Table)
            .and_where(Expr::col(Operations::Status).is_in(TERMINAL_STATUSES))
            .and_where(Expr::col(Operations::UpdatedAt).lt(to_millis(cutoff)))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
