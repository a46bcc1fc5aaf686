use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::context::RequestContext;
use crate::domain::Order;

pub mod redis;

pub use self::redis::RedisIdempotencyCache;

// ============================================================================
// Idempotency Cache Contract
// ============================================================================
//
// TTL-bound key/value store mapping (tenant, client key) to a cached
// response plus a request-body fingerprint. Expiry means idempotency
// protection lapses; that is an accepted, time-bounded guarantee.
//
// `set_if_absent` is the atomic insert-if-absent primitive that closes the
// create-path race: two concurrent identical requests cannot both win the
// reservation.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache error: {0}")]
    Backend(#[from] ::redis::RedisError),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache operation timed out")]
    Timeout,
}

/// Cached outcome of a create request. `response: None` marks a reservation
/// taken by an in-flight request that has not completed yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub fingerprint: String,
    pub response: Option<Order>,
}

impl IdempotencyRecord {
    pub fn pending(fingerprint: String) -> Self {
        Self {
            fingerprint,
            response: None,
        }
    }

    pub fn completed(fingerprint: String, order: Order) -> Self {
        Self {
            fingerprint,
            response: Some(order),
        }
    }
}

#[async_trait]
pub trait IdempotencyCache: Send + Sync {
    async fn get(
        &self,
        ctx: &RequestContext,
        tenant_id: &str,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, CacheError>;

    async fn set(
        &self,
        ctx: &RequestContext,
        tenant_id: &str,
        key: &str,
        record: &IdempotencyRecord,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Returns `true` when the reservation was taken, `false` when a record
    /// already exists for the key.
    async fn set_if_absent(
        &self,
        ctx: &RequestContext,
        tenant_id: &str,
        key: &str,
        record: &IdempotencyRecord,
        ttl: Duration,
    ) -> Result<bool, CacheError>;

    /// Release a reservation after a failed create, so an identical retry
    /// is not locked out until the TTL lapses.
    async fn remove(
        &self,
        ctx: &RequestContext,
        tenant_id: &str,
        key: &str,
    ) -> Result<(), CacheError>;
}

// ============================================================================
// Body Fingerprint
// ============================================================================

/// Deterministic, order-independent fingerprint of a request body.
///
/// serde_json maps are BTreeMap-backed, so serializing a `Value` emits
/// object keys in sorted order at every nesting level; two bodies that
/// differ only in key order produce the same digest.
pub fn body_fingerprint(body: &serde_json::Value) -> String {
    let canonical = body.to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let body = serde_json::json!({"a": 1, "b": {"c": [1, 2, 3]}});
        assert_eq!(body_fingerprint(&body), body_fingerprint(&body));
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a: serde_json::Value = serde_json::from_str(r#"{"x": 1, "y": 2}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"y": 2, "x": 1}"#).unwrap();
        assert_eq!(body_fingerprint(&a), body_fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_differs_on_different_values() {
        let a = serde_json::json!({"a": 1});
        let b = serde_json::json!({"a": 2});
        assert_ne!(body_fingerprint(&a), body_fingerprint(&b));
    }

    #[test]
    fn test_record_round_trips_through_json() {
        let record = IdempotencyRecord::completed(
            body_fingerprint(&serde_json::json!({})),
            crate::domain::Order::new_draft("tenant-a"),
        );

        let json = serde_json::to_string(&record).unwrap();
        let decoded: IdempotencyRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded.fingerprint, record.fingerprint);
        assert_eq!(
            decoded.response.unwrap().id,
            record.response.unwrap().id
        );
    }
}
