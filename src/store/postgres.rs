use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::{OrderStore, OrderUnitOfWork, StoreError};
use crate::context::RequestContext;
use crate::domain::{Cursor, Order, OutboxRecord};

// ============================================================================
// Postgres Order Store
// ============================================================================
//
// sqlx-backed implementation. Every call is bounded by `op_timeout`; no
// store call is allowed to block indefinitely. The unit of work wraps one
// sqlx transaction and is dropped (implicitly rolled back) on any error.
//
// ============================================================================

#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
    op_timeout: Duration,
}

impl PgOrderStore {
    pub fn new(pool: PgPool, op_timeout: Duration) -> Self {
        Self { pool, op_timeout }
    }
}

/// Bound a store call by `limit`; elapsed time maps to `StoreError::Timeout`.
async fn timed<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(StoreError::Timeout),
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn get_by_id_and_tenant(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        tenant_id: &str,
    ) -> Result<Option<Order>, StoreError> {
        tracing::debug!(trace_id = %ctx.trace_id, order_id = %id, "Loading order");

        timed(
            self.op_timeout,
            sqlx::query_as::<_, Order>(
                "SELECT id, tenant_id, status, version, total_cents, created_at, updated_at
                 FROM orders
                 WHERE id = $1 AND tenant_id = $2",
            )
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(&self.pool),
        )
        .await
    }

    async fn insert(&self, ctx: &RequestContext, order: &Order) -> Result<(), StoreError> {
        tracing::debug!(trace_id = %ctx.trace_id, order_id = %order.id, "Inserting order");

        timed(
            self.op_timeout,
            sqlx::query(
                "INSERT INTO orders (id, tenant_id, status, version, total_cents, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(order.id)
            .bind(&order.tenant_id)
            .bind(order.status)
            .bind(order.version)
            .bind(order.total_cents)
            .bind(order.created_at)
            .bind(order.updated_at)
            .execute(&self.pool),
        )
        .await?;

        Ok(())
    }

    async fn conditional_update(
        &self,
        ctx: &RequestContext,
        order: &Order,
        expected_version: i32,
    ) -> Result<bool, StoreError> {
        // The version predicate re-validates the compare-and-swap at write
        // time, not merely at the earlier read.
        let result = timed(
            self.op_timeout,
            sqlx::query(
                "UPDATE orders
                 SET status = $1, version = $2, total_cents = $3, updated_at = $4
                 WHERE id = $5 AND tenant_id = $6 AND version = $7",
            )
            .bind(order.status)
            .bind(order.version)
            .bind(order.total_cents)
            .bind(order.updated_at)
            .bind(order.id)
            .bind(&order.tenant_id)
            .bind(expected_version)
            .execute(&self.pool),
        )
        .await?;

        let updated = result.rows_affected() == 1;
        if !updated {
            tracing::debug!(
                trace_id = %ctx.trace_id,
                order_id = %order.id,
                expected_version = expected_version,
                "Conditional update matched no rows"
            );
        }

        Ok(updated)
    }

    async fn list_page(
        &self,
        ctx: &RequestContext,
        tenant_id: &str,
        limit: i64,
        cursor: Option<&Cursor>,
    ) -> Result<Vec<Order>, StoreError> {
        tracing::debug!(trace_id = %ctx.trace_id, tenant_id = %tenant_id, limit = limit, "Listing orders");

        // Row-value comparison gives lexicographic tuple ordering, which is
        // what the composite index (tenant_id, created_at DESC, id DESC)
        // serves. Two independent filters would skip rows.
        let query = match cursor {
            Some(cursor) => sqlx::query_as::<_, Order>(
                "SELECT id, tenant_id, status, version, total_cents, created_at, updated_at
                 FROM orders
                 WHERE tenant_id = $1 AND (created_at, id) < ($2, $3)
                 ORDER BY created_at DESC, id DESC
                 LIMIT $4",
            )
            .bind(tenant_id)
            .bind(cursor.created_at)
            .bind(cursor.id)
            .bind(limit),
            None => sqlx::query_as::<_, Order>(
                "SELECT id, tenant_id, status, version, total_cents, created_at, updated_at
                 FROM orders
                 WHERE tenant_id = $1
                 ORDER BY created_at DESC, id DESC
                 LIMIT $2",
            )
            .bind(tenant_id)
            .bind(limit),
        };

        timed(self.op_timeout, query.fetch_all(&self.pool)).await
    }

    async fn begin(&self) -> Result<Box<dyn OrderUnitOfWork>, StoreError> {
        let tx = timed(self.op_timeout, self.pool.begin()).await?;
        Ok(Box::new(PgUnitOfWork {
            tx,
            op_timeout: self.op_timeout,
        }))
    }

    async fn unpublished_outbox(&self, limit: i64) -> Result<Vec<OutboxRecord>, StoreError> {
        timed(
            self.op_timeout,
            sqlx::query_as::<_, OutboxRecord>(
                "SELECT id, event_type, order_id, tenant_id, payload, published_at, created_at
                 FROM outbox
                 WHERE published_at IS NULL
                 ORDER BY created_at ASC
                 LIMIT $1",
            )
            .bind(limit)
            .fetch_all(&self.pool),
        )
        .await
    }

    async fn mark_outbox_published(&self, id: Uuid) -> Result<(), StoreError> {
        timed(
            self.op_timeout,
            sqlx::query("UPDATE outbox SET published_at = $1 WHERE id = $2")
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool),
        )
        .await?;

        Ok(())
    }
}

// ============================================================================
// Postgres Unit of Work
// ============================================================================

struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
    op_timeout: Duration,
}

#[async_trait]
impl OrderUnitOfWork for PgUnitOfWork {
    async fn get_for_update(
        &mut self,
        id: Uuid,
        tenant_id: &str,
    ) -> Result<Option<Order>, StoreError> {
        // FOR UPDATE blocks a concurrent close of the same row until this
        // transaction resolves.
        timed(
            self.op_timeout,
            sqlx::query_as::<_, Order>(
                "SELECT id, tenant_id, status, version, total_cents, created_at, updated_at
                 FROM orders
                 WHERE id = $1 AND tenant_id = $2
                 FOR UPDATE",
            )
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(&mut *self.tx),
        )
        .await
    }

    async fn update_order(&mut self, order: &Order) -> Result<(), StoreError> {
        timed(
            self.op_timeout,
            sqlx::query(
                "UPDATE orders
                 SET status = $1, version = $2, total_cents = $3, updated_at = $4
                 WHERE id = $5 AND tenant_id = $6",
            )
            .bind(order.status)
            .bind(order.version)
            .bind(order.total_cents)
            .bind(order.updated_at)
            .bind(order.id)
            .bind(&order.tenant_id)
            .execute(&mut *self.tx),
        )
        .await?;

        Ok(())
    }

    async fn insert_outbox(&mut self, record: &OutboxRecord) -> Result<(), StoreError> {
        timed(
            self.op_timeout,
            sqlx::query(
                "INSERT INTO outbox (id, event_type, order_id, tenant_id, payload, published_at, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(record.id)
            .bind(&record.event_type)
            .bind(record.order_id)
            .bind(&record.tenant_id)
            .bind(&record.payload)
            .bind(record.published_at)
            .bind(record.created_at)
            .execute(&mut *self.tx),
        )
        .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        match tokio::time::timeout(self.op_timeout, self.tx.commit()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StoreError::Timeout),
        }
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        match tokio::time::timeout(self.op_timeout, self.tx.rollback()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StoreError::Timeout),
        }
    }
}
