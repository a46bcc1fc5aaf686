mod server;

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

pub use server::start_metrics_server;

// ============================================================================
// Metrics - Prometheus counters for the order lifecycle
// ============================================================================
//
// Covers:
// - Lifecycle transitions (created, confirmed, closed)
// - Idempotency protocol outcomes (replays, conflicts)
// - Event publishing failures (per event type)
// - Outbox relay throughput
//
// All metrics are registered with Prometheus and scraped via /metrics.
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Lifecycle transitions
    pub orders_created: IntCounter,
    pub orders_confirmed: IntCounter,
    pub orders_closed: IntCounter,

    // Idempotency protocol
    pub idempotent_replays: IntCounter,
    pub idempotency_conflicts: IntCounter,

    // Event publishing
    pub publish_failures: IntCounterVec,

    // Outbox relay
    pub outbox_relayed: IntCounter,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let orders_created = IntCounter::new("orders_created_total", "Total draft orders created")?;
        registry.register(Box::new(orders_created.clone()))?;

        let orders_confirmed =
            IntCounter::new("orders_confirmed_total", "Total orders confirmed")?;
        registry.register(Box::new(orders_confirmed.clone()))?;

        let orders_closed = IntCounter::new("orders_closed_total", "Total orders closed")?;
        registry.register(Box::new(orders_closed.clone()))?;

        let idempotent_replays = IntCounter::new(
            "idempotent_replays_total",
            "Create requests answered from the idempotency cache",
        )?;
        registry.register(Box::new(idempotent_replays.clone()))?;

        let idempotency_conflicts = IntCounter::new(
            "idempotency_conflicts_total",
            "Create requests rejected for reusing a key with a different body",
        )?;
        registry.register(Box::new(idempotency_conflicts.clone()))?;

        let publish_failures = IntCounterVec::new(
            Opts::new(
                "event_publish_failures_total",
                "Best-effort event publishes that failed (and were swallowed)",
            ),
            &["event_type"],
        )?;
        registry.register(Box::new(publish_failures.clone()))?;

        let outbox_relayed = IntCounter::new(
            "outbox_relayed_total",
            "Outbox rows published and stamped by the relay",
        )?;
        registry.register(Box::new(outbox_relayed.clone()))?;

        Ok(Self {
            registry,
            orders_created,
            orders_confirmed,
            orders_closed,
            idempotent_replays,
            idempotency_conflicts,
            publish_failures,
            outbox_relayed,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_publish_failure(&self, event_type: &str) {
        self.publish_failures.with_label_values(&[event_type]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_cleanly() {
        let metrics = Metrics::new().unwrap();
        metrics.orders_created.inc();
        metrics.record_publish_failure("orders.closed");

        let families = metrics.registry().gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "orders_created_total"));
        assert!(families
            .iter()
            .any(|f| f.get_name() == "event_publish_failures_total"));
    }
}
