use std::sync::Arc;
use std::time::Duration;

use crate::context::RequestContext;
use crate::events::EventPublisher;
use crate::metrics::Metrics;
use crate::store::OrderStore;
use crate::utils::{retry_with_backoff, RetryConfig};

// ============================================================================
// Outbox Relay
// ============================================================================
//
// Polls the outbox for rows that have not been published and pushes them
// through the event transport, stamping published_at on success. This is the
// durable at-least-once path for the terminal event: the direct publish at
// close time may already have delivered it, so consumers deduplicate by
// event id.
//
// Rows are processed oldest first. A row that keeps failing stays
// unpublished and is picked up again on the next poll; the relay never
// drops it.
//
// ============================================================================

pub struct OutboxRelay {
    store: Arc<dyn OrderStore>,
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<Metrics>,
    poll_interval: Duration,
    batch_size: i64,
    retry: RetryConfig,
}

impl OutboxRelay {
    pub fn new(
        store: Arc<dyn OrderStore>,
        publisher: Arc<dyn EventPublisher>,
        metrics: Arc<Metrics>,
        poll_interval: Duration,
        batch_size: i64,
    ) -> Self {
        Self {
            store,
            publisher,
            metrics,
            poll_interval,
            batch_size,
            retry: RetryConfig::default(),
        }
    }

    /// Poll loop; runs until the task is dropped at shutdown.
    pub async fn run(self) {
        tracing::info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            batch_size = self.batch_size,
            "Outbox relay started"
        );

        loop {
            match self.drain_once().await {
                Ok(published) if published > 0 => {
                    tracing::debug!(published = published, "Outbox batch relayed");
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(error = %err, "Outbox poll failed");
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Publish one batch of unpublished rows. Returns how many were stamped.
    pub async fn drain_once(&self) -> anyhow::Result<usize> {
        let rows = self.store.unpublished_outbox(self.batch_size).await?;
        let mut published = 0;

        for record in rows {
            let ctx = RequestContext::new();

            let result = retry_with_backoff(self.retry.clone(), |_attempt| {
                let ctx = &ctx;
                let record = &record;
                async move {
                    self.publisher
                        .publish(ctx, &record.event_type, &record.tenant_id, record.payload.clone())
                        .await
                }
            })
            .await;

            match result {
                Ok(()) => {
                    self.store.mark_outbox_published(record.id).await?;
                    self.metrics.outbox_relayed.inc();
                    published += 1;
                }
                Err(err) => {
                    // Transport is unhealthy; leave the rest of the batch
                    // for the next poll instead of hammering it.
                    tracing::warn!(
                        outbox_id = %record.id,
                        event_type = %record.event_type,
                        error = %err,
                        "Outbox row not published, will retry on next poll"
                    );
                    break;
                }
            }
        }

        Ok(published)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
