use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Order - Tenant-Scoped Lifecycle Aggregate
// ============================================================================
//
// Status moves strictly draft -> confirmed -> closed, no skips, no
// reversals. Every successful mutation bumps `version` by exactly one;
// `total_cents` is set once at confirm and immutable afterwards.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
pub enum OrderStatus {
    Draft,
    Confirmed,
    Closed,
}

/// Serialized with camelCase field names: this struct is both the API
/// representation and the cached idempotency response.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub tenant_id: String,
    pub status: OrderStatus,
    pub version: i32,
    pub total_cents: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Build a fresh draft for a tenant. Version starts at 1.
    pub fn new_draft(tenant_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            status: OrderStatus::Draft,
            version: 1,
            total_cents: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply the draft -> confirmed transition in memory.
    /// The store re-validates the version condition at write time.
    pub fn confirmed(mut self, total_cents: i64) -> Self {
        self.status = OrderStatus::Confirmed;
        self.total_cents = Some(total_cents);
        self.version += 1;
        self.updated_at = Utc::now();
        self
    }

    /// Apply the confirmed -> closed transition in memory.
    pub fn closed(mut self) -> Self {
        self.status = OrderStatus::Closed;
        self.version += 1;
        self.updated_at = Utc::now();
        self
    }
}

// ============================================================================
// Outbox Record
// ============================================================================

/// One row in the outbox table, written in the same transaction as the
/// close mutation it describes. `published_at` is stamped by the relay.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutboxRecord {
    pub id: Uuid,
    pub event_type: String,
    pub order_id: Uuid,
    pub tenant_id: String,
    pub payload: serde_json::Value,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OutboxRecord {
    pub fn for_closed_order(order: &Order, closed_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: "orders.closed".to_string(),
            order_id: order.id,
            tenant_id: order.tenant_id.clone(),
            payload: serde_json::json!({
                "orderId": order.id,
                "tenantId": order.tenant_id,
                "totalCents": order.total_cents,
                "closedAt": closed_at.to_rfc3339(),
            }),
            published_at: None,
            created_at: closed_at,
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
