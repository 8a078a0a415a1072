//! Postgres-backed watermark store.
//!
//! Concurrent advances of one scope are serialised with
//! `SELECT ... FOR UPDATE` on the scope row, so several processes can poll
//! the same directory safely.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{ScopeWatermark, WatermarkLease, WatermarkStore};
use crate::error::{SyncError, SyncResult};

/// Watermark store persisting to the `scope_watermarks` table.
#[derive(Debug, Clone)]
pub struct PgWatermarkStore {
    pool: PgPool,
}

impl PgWatermarkStore {
    /// Create a new store on an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded schema migrations.
    pub async fn run_migrations(&self) -> SyncResult<()> {
        tracing::info!("Running database migrations...");

        sqlx::migrate!("./migrations").run(&self.pool).await?;

        tracing::info!("Migrations completed successfully");
        Ok(())
    }
}

#[async_trait]
impl WatermarkStore for PgWatermarkStore {
    #[instrument(skip(self))]
    async fn ensure_scope(&self, scope: &str) -> SyncResult<()> {
        let result = sqlx::query(
            r"
            INSERT INTO scope_watermarks (scope)
            VALUES ($1)
            ON CONFLICT (scope) DO NOTHING
            ",
        )
        .bind(scope)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            debug!(scope = %scope, "Created watermark row");
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn read_for_update(&self, scope: &str) -> SyncResult<Box<dyn WatermarkLease>> {
        let mut tx = self.pool.begin().await?;

        let row: Option<WatermarkRow> = sqlx::query_as(
            r"
            SELECT scope, last_seen_at, observed_ids
            FROM scope_watermarks
            WHERE scope = $1
            FOR UPDATE
            ",
        )
        .bind(scope)
        .fetch_optional(&mut *tx)
        .await?;

        let current = row
            .map(WatermarkRow::into_watermark)
            .ok_or_else(|| SyncError::unknown_scope(scope))?;

        Ok(Box::new(PgWatermarkLease { tx, current }))
    }

    #[instrument(skip(self))]
    async fn fetch(&self, scope: &str) -> SyncResult<Option<ScopeWatermark>> {
        let row: Option<WatermarkRow> = sqlx::query_as(
            r"
            SELECT scope, last_seen_at, observed_ids
            FROM scope_watermarks
            WHERE scope = $1
            ",
        )
        .bind(scope)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(WatermarkRow::into_watermark))
    }
}

/// Row lock held inside an open transaction.
struct PgWatermarkLease {
    tx: Transaction<'static, Postgres>,
    current: ScopeWatermark,
}

#[async_trait]
impl WatermarkLease for PgWatermarkLease {
    fn current(&self) -> &ScopeWatermark {
        &self.current
    }

    async fn write(self: Box<Self>, next: &ScopeWatermark) -> SyncResult<()> {
        let PgWatermarkLease { mut tx, current } = *self;
        let observed_ids: Vec<Uuid> = next.observed_ids.iter().copied().collect();

        sqlx::query(
            r"
            UPDATE scope_watermarks
            SET last_seen_at = $2, observed_ids = $3
            WHERE scope = $1
            ",
        )
        .bind(&current.scope)
        .bind(next.last_seen_at)
        .bind(&observed_ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn release(self: Box<Self>) -> SyncResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WatermarkRow {
    scope: String,
    last_seen_at: DateTime<Utc>,
    observed_ids: Vec<Uuid>,
}

impl WatermarkRow {
    fn into_watermark(self) -> ScopeWatermark {
        ScopeWatermark {
            scope: self.scope,
            last_seen_at: self.last_seen_at,
            observed_ids: self.observed_ids.into_iter().collect(),
        }
    }
}
