use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::RequestContext;

pub mod kafka;

pub use kafka::KafkaPublisher;

// ============================================================================
// Lifecycle Events
// ============================================================================
//
// Best-effort, fire-and-forget transport for lifecycle events. A publish
// failure is logged by the caller and never propagated; committed state is
// authoritative and the outbox is the durable fallback for the terminal
// event. Consumers must be idempotent by contract: the close path publishes
// both directly and through the outbox relay.
//
// ============================================================================

pub const EVENT_ORDER_CREATED: &str = "orders.created";
pub const EVENT_ORDER_CONFIRMED: &str = "orders.confirmed";
pub const EVENT_ORDER_CLOSED: &str = "orders.closed";

/// Wire envelope for every published event. Field names are camelCase on
/// the wire (`tenantId`, `schemaVersion`, `traceId`), matching what topic
/// consumers already parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub tenant_id: String,
    pub time: DateTime<Utc>,
    pub schema_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub data: serde_json::Value,
}

impl EventEnvelope {
    pub fn new(
        event_type: &str,
        tenant_id: &str,
        trace_id: Option<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            source: "orders-service".to_string(),
            tenant_id: tenant_id.to_string(),
            time: Utc::now(),
            schema_version: "1".to_string(),
            trace_id,
            data,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("event publish failed: {0}")]
pub struct PublishError(#[source] pub anyhow::Error);

/// Capability interface for the event transport. The orchestrator never
/// branches on whether a transport is configured; wiring picks the real
/// implementation or the noop at startup.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        ctx: &RequestContext,
        event_type: &str,
        tenant_id: &str,
        data: serde_json::Value,
    ) -> Result<(), PublishError>;
}

// ============================================================================
// Noop Publisher
// ============================================================================

/// Stands in when the event transport is disabled or absent; events are
/// skipped, not queued.
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(
        &self,
        ctx: &RequestContext,
        event_type: &str,
        tenant_id: &str,
        _data: serde_json::Value,
    ) -> Result<(), PublishError> {
        tracing::debug!(
            trace_id = %ctx.trace_id,
            event_type = %event_type,
            tenant_id = %tenant_id,
            "Event transport disabled, skipping publish"
        );
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = EventEnvelope::new(
            EVENT_ORDER_CLOSED,
            "tenant-a",
            Some("trace-1".to_string()),
            serde_json::json!({"orderId": "x"}),
        );

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "orders.closed");
        assert_eq!(json["source"], "orders-service");
        assert_eq!(json["schemaVersion"], "1");
        assert_eq!(json["tenantId"], "tenant-a");
        assert_eq!(json["traceId"], "trace-1");
        assert_eq!(json["data"]["orderId"], "x");
    }

    #[test]
    fn test_envelope_omits_absent_trace_id() {
        let envelope =
            EventEnvelope::new(EVENT_ORDER_CREATED, "tenant-a", None, serde_json::json!({}));
        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json.get("traceId").is_none());
    }

    #[tokio::test]
    async fn test_noop_publisher_always_succeeds() {
        let ctx = RequestContext::new();
        let result = NoopPublisher
            .publish(&ctx, EVENT_ORDER_CREATED, "tenant-a", serde_json::json!({}))
            .await;
        assert!(result.is_ok());
    }
}
