use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::cache::{CacheError, IdempotencyCache, IdempotencyRecord};
use crate::context::RequestContext;
use crate::domain::{Cursor, Order, OutboxRecord};
use crate::events::{EventPublisher, PublishError};
use crate::store::{OrderStore, OrderUnitOfWork, StoreError};

// ============================================================================
// In-Memory Fakes for Unit Tests
// ============================================================================
//
// Deterministic stand-ins for the store, the cache, and the publisher. The
// store honors the same contracts as Postgres: tuple-ordered keyset pages,
// version-checked conditional updates, and a unit of work that stages writes
// and applies them atomically at commit.
//
// ============================================================================

#[derive(Default)]
struct MemState {
    orders: HashMap<Uuid, Order>,
    outbox: Vec<OutboxRecord>,
}

pub struct MemOrderStore {
    state: Arc<Mutex<MemState>>,
    /// When set, `insert` fails, exercising the reservation-release path.
    pub fail_insert: Arc<AtomicBool>,
    /// When set, `insert_outbox` fails inside the unit of work, forcing a
    /// rollback of the whole close transaction.
    pub fail_outbox_insert: Arc<AtomicBool>,
}

impl MemOrderStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemState::default())),
            fail_insert: Arc::new(AtomicBool::new(false)),
            fail_outbox_insert: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn order(&self, id: Uuid) -> Option<Order> {
        self.state.lock().unwrap().orders.get(&id).cloned()
    }

    pub fn outbox_records(&self) -> Vec<OutboxRecord> {
        self.state.lock().unwrap().outbox.clone()
    }

    /// Seed an outbox row directly (for relay tests).
    pub fn seed_outbox(&self, record: OutboxRecord) {
        self.state.lock().unwrap().outbox.push(record);
    }

    /// Seed an order row directly, bypassing the lifecycle (for pagination
    /// tests that need controlled timestamps).
    pub fn seed_order(&self, order: Order) {
        self.state.lock().unwrap().orders.insert(order.id, order);
    }
}

fn injected(message: &str) -> StoreError {
    StoreError::Database(sqlx::Error::Protocol(message.to_string()))
}

#[async_trait]
impl OrderStore for MemOrderStore {
    async fn get_by_id_and_tenant(
        &self,
        _ctx: &RequestContext,
        id: Uuid,
        tenant_id: &str,
    ) -> Result<Option<Order>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .orders
            .get(&id)
            .filter(|o| o.tenant_id == tenant_id)
            .cloned())
    }

    async fn insert(&self, _ctx: &RequestContext, order: &Order) -> Result<(), StoreError> {
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(injected("insert failed"));
        }
        let mut state = self.state.lock().unwrap();
        if state.orders.contains_key(&order.id) {
            return Err(injected("duplicate key"));
        }
        state.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn conditional_update(
        &self,
        _ctx: &RequestContext,
        order: &Order,
        expected_version: i32,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        match state.orders.get_mut(&order.id) {
            Some(existing)
                if existing.tenant_id == order.tenant_id
                    && existing.version == expected_version =>
            {
                *existing = order.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_page(
        &self,
        _ctx: &RequestContext,
        tenant_id: &str,
        limit: i64,
        cursor: Option<&Cursor>,
    ) -> Result<Vec<Order>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.tenant_id == tenant_id)
            .filter(|o| match cursor {
                // Lexicographic tuple comparison, matching the SQL
                // row-value predicate.
                Some(c) => (o.created_at, o.id) < (c.created_at, c.id),
                None => true,
            })
            .cloned()
            .collect();

        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn begin(&self) -> Result<Box<dyn OrderUnitOfWork>, StoreError> {
        Ok(Box::new(MemUnitOfWork {
            state: self.state.clone(),
            fail_outbox_insert: self.fail_outbox_insert.clone(),
            staged_order: None,
            staged_outbox: None,
        }))
    }

    async fn unpublished_outbox(&self, limit: i64) -> Result<Vec<OutboxRecord>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<OutboxRecord> = state
            .outbox
            .iter()
            .filter(|r| r.published_at.is_none())
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.created_at);
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn mark_outbox_published(&self, id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        for record in state.outbox.iter_mut() {
            if record.id == id {
                record.published_at = Some(chrono::Utc::now());
            }
        }
        Ok(())
    }
}

struct MemUnitOfWork {
    state: Arc<Mutex<MemState>>,
    fail_outbox_insert: Arc<AtomicBool>,
    staged_order: Option<Order>,
    staged_outbox: Option<OutboxRecord>,
}

#[async_trait]
impl OrderUnitOfWork for MemUnitOfWork {
    async fn get_for_update(
        &mut self,
        id: Uuid,
        tenant_id: &str,
    ) -> Result<Option<Order>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .orders
            .get(&id)
            .filter(|o| o.tenant_id == tenant_id)
            .cloned())
    }

    async fn update_order(&mut self, order: &Order) -> Result<(), StoreError> {
        self.staged_order = Some(order.clone());
        Ok(())
    }

    async fn insert_outbox(&mut self, record: &OutboxRecord) -> Result<(), StoreError> {
        if self.fail_outbox_insert.load(Ordering::SeqCst) {
            return Err(injected("outbox insert failed"));
        }
        self.staged_outbox = Some(record.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(order) = self.staged_order {
            state.orders.insert(order.id, order);
        }
        if let Some(record) = self.staged_outbox {
            state.outbox.push(record);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        // Staged writes are simply dropped.
        Ok(())
    }
}

// ============================================================================
// In-Memory Idempotency Cache
// ============================================================================

pub struct MemIdempotencyCache {
    entries: Mutex<HashMap<String, IdempotencyRecord>>,
    /// When set, `set` fails, exercising the swallowed completion-write path.
    pub fail_set: AtomicBool,
    /// When set, `remove` fails, exercising the reservation-release path.
    pub fail_remove: AtomicBool,
}

impl MemIdempotencyCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            fail_set: AtomicBool::new(false),
            fail_remove: AtomicBool::new(false),
        }
    }

    fn key(tenant_id: &str, key: &str) -> String {
        format!("{}:{}", tenant_id, key)
    }
}

#[async_trait]
impl IdempotencyCache for MemIdempotencyCache {
    async fn get(
        &self,
        _ctx: &RequestContext,
        tenant_id: &str,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, CacheError> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.get(&Self::key(tenant_id, key)).cloned())
    }

    async fn set(
        &self,
        _ctx: &RequestContext,
        tenant_id: &str,
        key: &str,
        record: &IdempotencyRecord,
        _ttl: Duration,
    ) -> Result<(), CacheError> {
        if self.fail_set.load(Ordering::SeqCst) {
            return Err(CacheError::Timeout);
        }
        let mut entries = self.entries.lock().unwrap();
        entries.insert(Self::key(tenant_id, key), record.clone());
        Ok(())
    }

    async fn set_if_absent(
        &self,
        _ctx: &RequestContext,
        tenant_id: &str,
        key: &str,
        record: &IdempotencyRecord,
        _ttl: Duration,
    ) -> Result<bool, CacheError> {
        let mut entries = self.entries.lock().unwrap();
        let cache_key = Self::key(tenant_id, key);
        if entries.contains_key(&cache_key) {
            return Ok(false);
        }
        entries.insert(cache_key, record.clone());
        Ok(true)
    }

    async fn remove(
        &self,
        _ctx: &RequestContext,
        tenant_id: &str,
        key: &str,
    ) -> Result<(), CacheError> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(CacheError::Timeout);
        }
        let mut entries = self.entries.lock().unwrap();
        entries.remove(&Self::key(tenant_id, key));
        Ok(())
    }
}

// ============================================================================
// Capturing Publisher
// ============================================================================

pub struct CapturingPublisher {
    pub events: Mutex<Vec<(String, String, serde_json::Value)>>,
    pub fail: AtomicBool,
}

impl CapturingPublisher {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(event_type, _, _)| event_type.clone())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for CapturingPublisher {
    async fn publish(
        &self,
        _ctx: &RequestContext,
        event_type: &str,
        tenant_id: &str,
        data: serde_json::Value,
    ) -> Result<(), PublishError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PublishError(anyhow::anyhow!("transport down")));
        }
        self.events.lock().unwrap().push((
            event_type.to_string(),
            tenant_id.to_string(),
            data,
        ));
        Ok(())
    }
}
