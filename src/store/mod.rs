use async_trait::async_trait;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::domain::{Cursor, Order, OutboxRecord};

pub mod postgres;

pub use postgres::PgOrderStore;

// ============================================================================
// Order Store Contract
// ============================================================================
//
// Persistence seam consumed by the orchestrator. Two pieces:
//
// - `OrderStore`: scoped lookup, insert, conditional (version-checked)
//   update, keyset page query, and outbox polling for the relay.
// - `OrderUnitOfWork`: a single transaction spanning load-for-update,
//   status update, and outbox insert. Either everything commits or
//   everything rolls back; no partial state is ever visible.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store operation timed out")]
    Timeout,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Scoped lookup. Cross-tenant access and nonexistence are
    /// indistinguishable: both come back as `None`.
    async fn get_by_id_and_tenant(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        tenant_id: &str,
    ) -> Result<Option<Order>, StoreError>;

    async fn insert(&self, ctx: &RequestContext, order: &Order) -> Result<(), StoreError>;

    /// Version-checked write. The WHERE clause re-validates
    /// `expected_version` at write time; returns `false` when zero rows
    /// matched (a concurrent writer got there first).
    async fn conditional_update(
        &self,
        ctx: &RequestContext,
        order: &Order,
        expected_version: i32,
    ) -> Result<bool, StoreError>;

    /// One keyset page ordered by (created_at DESC, id DESC), restricted to
    /// rows strictly below `cursor` under lexicographic tuple comparison.
    /// `limit` is passed through as-is; the caller does the +1 fetch.
    async fn list_page(
        &self,
        ctx: &RequestContext,
        tenant_id: &str,
        limit: i64,
        cursor: Option<&Cursor>,
    ) -> Result<Vec<Order>, StoreError>;

    async fn begin(&self) -> Result<Box<dyn OrderUnitOfWork>, StoreError>;

    /// Oldest-first batch of outbox rows not yet stamped `published_at`.
    async fn unpublished_outbox(&self, limit: i64) -> Result<Vec<OutboxRecord>, StoreError>;

    async fn mark_outbox_published(&self, id: Uuid) -> Result<(), StoreError>;
}

#[async_trait]
pub trait OrderUnitOfWork: Send {
    /// Locking read (SELECT ... FOR UPDATE); a concurrent transaction on the
    /// same row blocks until this one commits or rolls back.
    async fn get_for_update(
        &mut self,
        id: Uuid,
        tenant_id: &str,
    ) -> Result<Option<Order>, StoreError>;

    async fn update_order(&mut self, order: &Order) -> Result<(), StoreError>;

    async fn insert_outbox(&mut self, record: &OutboxRecord) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
