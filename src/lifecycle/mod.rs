use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::cache::{body_fingerprint, IdempotencyCache, IdempotencyRecord};
use crate::context::RequestContext;
use crate::domain::{Cursor, LifecycleError, Order, OrderStatus, OutboxRecord};
use crate::events::{
    EventPublisher, EVENT_ORDER_CLOSED, EVENT_ORDER_CONFIRMED, EVENT_ORDER_CREATED,
};
use crate::metrics::Metrics;
use crate::store::{OrderStore, OrderUnitOfWork};

// ============================================================================
// Order Lifecycle Orchestrator
// ============================================================================
//
// The one component with real design: create / confirm / close / list over
// the store, the idempotency cache, and the event publisher. Holds direct
// references to its collaborators, assigned at construction; no registry
// lookups, no in-process locks. Requests touching the same order serialize
// through the store's concurrency control (version-checked writes for
// confirm, transactional row locking for close).
//
// ============================================================================

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;
const RESERVE_ATTEMPTS: u32 = 3;

/// One page of a tenant's orders, newest first.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPage {
    pub items: Vec<Order>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

pub struct OrderLifecycle {
    store: Arc<dyn OrderStore>,
    cache: Arc<dyn IdempotencyCache>,
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<Metrics>,
    idempotency_ttl: Duration,
}

impl OrderLifecycle {
    pub fn new(
        store: Arc<dyn OrderStore>,
        cache: Arc<dyn IdempotencyCache>,
        publisher: Arc<dyn EventPublisher>,
        metrics: Arc<Metrics>,
        idempotency_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            publisher,
            metrics,
            idempotency_ttl,
        }
    }

    // ========================================================================
    // createDraft
    // ========================================================================

    /// Create a draft order, deduplicated by (tenant, idempotency key).
    ///
    /// The reservation is taken with an atomic insert-if-absent, so two
    /// concurrent requests carrying the same key cannot both insert. A
    /// losing request either replays the winner's cached response, conflicts
    /// on a fingerprint mismatch, or conflicts while the winner is still in
    /// flight.
    pub async fn create_draft(
        &self,
        ctx: &RequestContext,
        tenant_id: &str,
        idempotency_key: &str,
        body: &serde_json::Value,
    ) -> Result<Order, LifecycleError> {
        if idempotency_key.is_empty() {
            return Err(LifecycleError::validation("Idempotency-Key required"));
        }

        let fingerprint = body_fingerprint(body);
        let reservation = IdempotencyRecord::pending(fingerprint.clone());

        // Reservation loop. Losing the race and then reading no record means
        // the existing record expired in between; reserve again instead of
        // proceeding unreserved, which would reopen the race.
        let mut attempt = 0;
        loop {
            attempt += 1;
            let reserved = self
                .cache
                .set_if_absent(
                    ctx,
                    tenant_id,
                    idempotency_key,
                    &reservation,
                    self.idempotency_ttl,
                )
                .await?;
            if reserved {
                break;
            }

            match self.cache.get(ctx, tenant_id, idempotency_key).await? {
                Some(existing) if existing.fingerprint != fingerprint => {
                    tracing::info!(
                        trace_id = %ctx.trace_id,
                        tenant_id = %tenant_id,
                        "Idempotency key reused with a different body"
                    );
                    self.metrics.idempotency_conflicts.inc();
                    return Err(LifecycleError::conflict("Idempotency key already used"));
                }
                Some(existing) => match existing.response {
                    Some(order) => {
                        // Pure replay: no new writes.
                        tracing::debug!(
                            trace_id = %ctx.trace_id,
                            order_id = %order.id,
                            "Replaying cached create response"
                        );
                        self.metrics.idempotent_replays.inc();
                        return Ok(order);
                    }
                    None => {
                        // The winning request has reserved the key but not
                        // finished; callers retry.
                        return Err(LifecycleError::conflict("Idempotent request in flight"));
                    }
                },
                None if attempt < RESERVE_ATTEMPTS => continue,
                None => {
                    // Records keep expiring out from under us; give up
                    // rather than insert without a reservation.
                    return Err(LifecycleError::conflict("Idempotent request in flight"));
                }
            }
        }

        let order = Order::new_draft(tenant_id);
        if let Err(err) = self.store.insert(ctx, &order).await {
            // Release the reservation so an identical retry is not locked
            // out until the TTL lapses. The insert error is the one to
            // surface; a failed release only gets logged.
            if let Err(cache_err) = self.cache.remove(ctx, tenant_id, idempotency_key).await {
                tracing::warn!(
                    trace_id = %ctx.trace_id,
                    tenant_id = %tenant_id,
                    error = %cache_err,
                    "Failed to release idempotency reservation"
                );
            }
            return Err(err.into());
        }

        // The insert is authoritative. A failed completion write is logged
        // and swallowed like a publish failure; failing the request here
        // would hide the created order from the caller.
        let record = IdempotencyRecord::completed(fingerprint, order.clone());
        if let Err(err) = self
            .cache
            .set(
                ctx,
                tenant_id,
                idempotency_key,
                &record,
                self.idempotency_ttl,
            )
            .await
        {
            tracing::warn!(
                trace_id = %ctx.trace_id,
                order_id = %order.id,
                error = %err,
                "Failed to cache idempotent create response"
            );
        }

        self.publish_best_effort(ctx, EVENT_ORDER_CREATED, tenant_id, &order)
            .await;
        self.metrics.orders_created.inc();

        tracing::info!(
            trace_id = %ctx.trace_id,
            order_id = %order.id,
            tenant_id = %tenant_id,
            "Draft order created"
        );

        Ok(order)
    }

    // ========================================================================
    // confirm
    // ========================================================================

    /// Confirm a draft order under optimistic concurrency control.
    ///
    /// A malformed version precondition is a Conflict, not a validation
    /// error; this classification is deliberate and preserved.
    pub async fn confirm(
        &self,
        ctx: &RequestContext,
        order_id: Uuid,
        tenant_id: &str,
        expected_version: i64,
        total_cents: i64,
    ) -> Result<Order, LifecycleError> {
        if expected_version < 1 {
            return Err(LifecycleError::conflict("Version required"));
        }
        if total_cents < 1 {
            return Err(LifecycleError::validation(
                "totalCents must be a positive integer",
            ));
        }

        let order = self
            .store
            .get_by_id_and_tenant(ctx, order_id, tenant_id)
            .await?
            .ok_or(LifecycleError::NotFound)?;

        if order.status != OrderStatus::Draft {
            return Err(LifecycleError::conflict(
                "Only draft orders can be confirmed",
            ));
        }
        if i64::from(order.version) != expected_version {
            return Err(LifecycleError::conflict("Version mismatch"));
        }

        let current_version = order.version;
        let confirmed = order.confirmed(total_cents);

        // The store re-validates the version in the WHERE clause; a
        // concurrent confirm that won the race leaves zero rows to update.
        let updated = self
            .store
            .conditional_update(ctx, &confirmed, current_version)
            .await?;
        if !updated {
            return Err(LifecycleError::conflict("Version mismatch"));
        }

        self.publish_best_effort(ctx, EVENT_ORDER_CONFIRMED, tenant_id, &confirmed)
            .await;
        self.metrics.orders_confirmed.inc();

        tracing::info!(
            trace_id = %ctx.trace_id,
            order_id = %confirmed.id,
            version = confirmed.version,
            "Order confirmed"
        );

        Ok(confirmed)
    }

    // ========================================================================
    // close
    // ========================================================================

    /// Close a confirmed order. The status change and its outbox row commit
    /// in one transaction; any failure rolls both back. After the commit, a
    /// best-effort direct publish runs in addition to the durable outbox row
    /// (consumers are idempotent by contract).
    pub async fn close(
        &self,
        ctx: &RequestContext,
        order_id: Uuid,
        tenant_id: &str,
    ) -> Result<Order, LifecycleError> {
        let mut uow = self.store.begin().await?;

        let closed = match Self::close_in_tx(&mut uow, order_id, tenant_id).await {
            Ok(closed) => closed,
            Err(err) => {
                if let Err(rb_err) = uow.rollback().await {
                    tracing::error!(
                        trace_id = %ctx.trace_id,
                        order_id = %order_id,
                        error = %rb_err,
                        "Rollback failed after aborted close"
                    );
                }
                return Err(err);
            }
        };

        uow.commit().await?;

        self.publish_best_effort(ctx, EVENT_ORDER_CLOSED, tenant_id, &closed)
            .await;
        self.metrics.orders_closed.inc();

        tracing::info!(
            trace_id = %ctx.trace_id,
            order_id = %closed.id,
            version = closed.version,
            "Order closed"
        );

        Ok(closed)
    }

    async fn close_in_tx(
        uow: &mut Box<dyn OrderUnitOfWork>,
        order_id: Uuid,
        tenant_id: &str,
    ) -> Result<Order, LifecycleError> {
        let order = uow
            .get_for_update(order_id, tenant_id)
            .await?
            .ok_or(LifecycleError::NotFound)?;

        if order.status != OrderStatus::Confirmed {
            return Err(LifecycleError::conflict(
                "Order must be confirmed before close",
            ));
        }

        let closed = order.closed();
        uow.update_order(&closed).await?;

        let outbox = OutboxRecord::for_closed_order(&closed, closed.updated_at);
        uow.insert_outbox(&outbox).await?;

        Ok(closed)
    }

    // ========================================================================
    // list
    // ========================================================================

    /// Keyset-paginated listing, newest first, tiebroken by id descending.
    /// A malformed cursor is a Conflict; this classification is deliberate
    /// and preserved.
    pub async fn list(
        &self,
        ctx: &RequestContext,
        tenant_id: &str,
        limit: Option<i64>,
        cursor: Option<&str>,
    ) -> Result<OrderPage, LifecycleError> {
        let take = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

        let cursor = cursor
            .map(Cursor::decode)
            .transpose()
            .map_err(|_| LifecycleError::conflict("Invalid cursor"))?;

        // Fetch one extra row to detect a further page without a count query.
        let mut rows = self
            .store
            .list_page(ctx, tenant_id, take + 1, cursor.as_ref())
            .await?;

        let has_next = rows.len() as i64 > take;
        rows.truncate(take as usize);

        let next_cursor = if has_next {
            rows.last()
                .map(|last| Cursor::new(last.created_at, last.id).encode())
        } else {
            None
        };

        Ok(OrderPage {
            items: rows,
            next_cursor,
        })
    }

    // ========================================================================
    // Event publishing
    // ========================================================================

    /// Fire-and-forget publish. A transport failure must never fail the
    /// surrounding request: committed state is authoritative, and the outbox
    /// is the durable fallback for the terminal event.
    async fn publish_best_effort(
        &self,
        ctx: &RequestContext,
        event_type: &str,
        tenant_id: &str,
        order: &Order,
    ) {
        let data = match serde_json::to_value(order) {
            Ok(data) => data,
            Err(err) => {
                tracing::error!(
                    trace_id = %ctx.trace_id,
                    event_type = %event_type,
                    error = %err,
                    "Failed to serialize event payload"
                );
                self.metrics.record_publish_failure(event_type);
                return;
            }
        };

        if let Err(err) = self
            .publisher
            .publish(ctx, event_type, tenant_id, data)
            .await
        {
            tracing::warn!(
                trace_id = %ctx.trace_id,
                event_type = %event_type,
                tenant_id = %tenant_id,
                error = %err,
                "Event publish failed, continuing"
            );
            self.metrics.record_publish_failure(event_type);
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
