//! PostgreSQL record store.

use super::{RegistrationStore, StoreError};
use crate::model::{ApprovalRecord, ApprovalStatus, NewApprovalRecord, Page, PageRequest};

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// [`RegistrationStore`] backed by the `approval_records` table.
#[derive(Debug, Clone)]
pub struct PgRegistrationStore {
    pool: PgPool,
}

impl PgRegistrationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Apply pending migrations from `migrations/`.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        info!("Running database migrations...");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Rejected(format!("migration failed: {e}")))?;

        info!("Migrations completed successfully");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn count(&self, status: Option<ApprovalStatus>) -> Result<u64, StoreError> {
        let total: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*) FROM approval_records
            WHERE $1::approval_status IS NULL OR status = $1
            ",
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        Ok(u64::try_from(total).unwrap_or_default())
    }
}

#[async_trait]
impl RegistrationStore for PgRegistrationStore {
    #[instrument(skip(self, record), fields(email = %record.email))]
    async fn insert(&self, record: NewApprovalRecord) -> Result<ApprovalRecord, StoreError> {
        let stored = sqlx::query_as(
            r"
            INSERT INTO approval_records (correlation_id, first_name, last_name, email, status)
            VALUES ($1, $2, $3, $4, 'PENDING')
            RETURNING *
            ",
        )
        .bind(record.correlation_id)
        .bind(&record.first_name)
        .bind(&record.last_name)
        .bind(&record.email)
        .fetch_one(&self.pool)
        .await?;

        Ok(stored)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<ApprovalRecord>, StoreError> {
        let record = sqlx::query_as("SELECT * FROM approval_records WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn find_by_correlation_id(
        &self,
        correlation_id: Uuid,
    ) -> Result<Option<ApprovalRecord>, StoreError> {
        let record = sqlx::query_as("SELECT * FROM approval_records WHERE correlation_id = $1")
            .bind(correlation_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    #[instrument(skip(self))]
    async fn update_status(
        &self,
        id: Uuid,
        expected: ApprovalStatus,
        target: ApprovalStatus,
    ) -> Result<Option<ApprovalRecord>, StoreError> {
        let record = sqlx::query_as(
            r"
            UPDATE approval_records
            SET status = $3, status_changed_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING *
            ",
        )
        .bind(id)
        .bind(expected)
        .bind(target)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn delete_by_email(&self, email: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM approval_records WHERE email = $1")
            .bind(email)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_by_status(
        &self,
        status: ApprovalStatus,
        page: PageRequest,
    ) -> Result<Page<ApprovalRecord>, StoreError> {
        let items = sqlx::query_as(
            r"
            SELECT * FROM approval_records
            WHERE status = $1
            ORDER BY status_changed_at, id
            LIMIT $2 OFFSET $3
            ",
        )
        .bind(status)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let total = self.count(Some(status)).await?;
        Ok(Page::new(items, page, total))
    }

    async fn list_all(&self, page: PageRequest) -> Result<Page<ApprovalRecord>, StoreError> {
        let items = sqlx::query_as(
            r"
            SELECT * FROM approval_records
            ORDER BY status_changed_at, id
            LIMIT $1 OFFSET $2
            ",
        )
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let total = self.count(None).await?;
        Ok(Page::new(items, page, total))
    }
}
