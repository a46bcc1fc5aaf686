use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};

use super::{EventEnvelope, EventPublisher, PublishError};
use crate::context::RequestContext;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};

// ============================================================================
// Kafka Event Publisher
// ============================================================================
//
// Publishes event envelopes to a single topic, keyed by tenant id so events
// for one tenant stay ordered within a partition. A circuit breaker keeps a
// dead broker from stalling every request; while it is open, publishes fail
// fast and the caller's best-effort handling takes over.
//
// ============================================================================

pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
    circuit_breaker: CircuitBreaker,
}

impl KafkaPublisher {
    pub fn new(brokers: &str, topic: &str) -> anyhow::Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        let cb_config = CircuitBreakerConfig {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 3,
        };

        Ok(Self {
            producer,
            topic: topic.to_string(),
            circuit_breaker: CircuitBreaker::new(cb_config),
        })
    }
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish(
        &self,
        ctx: &RequestContext,
        event_type: &str,
        tenant_id: &str,
        data: serde_json::Value,
    ) -> Result<(), PublishError> {
        let envelope = EventEnvelope::new(event_type, tenant_id, Some(ctx.trace_id.clone()), data);
        let payload =
            serde_json::to_string(&envelope).map_err(|e| PublishError(e.into()))?;

        let result = self
            .circuit_breaker
            .guard(async {
                let record = FutureRecord::to(&self.topic)
                    .key(tenant_id)
                    .payload(&payload);

                self.producer
                    .send(record, rdkafka::util::Timeout::After(Duration::from_secs(5)))
                    .await
                    .map_err(|(e, _)| anyhow::anyhow!("Kafka send error: {}", e))?;

                Ok::<(), anyhow::Error>(())
            })
            .await;

        match result {
            Ok(()) => {
                tracing::debug!(
                    trace_id = %ctx.trace_id,
                    event_type = %event_type,
                    tenant_id = %tenant_id,
                    topic = %self.topic,
                    "Published lifecycle event"
                );
                Ok(())
            }
            Err(CircuitBreakerError::CircuitOpen) => {
                tracing::error!(
                    event_type = %event_type,
                    topic = %self.topic,
                    "Circuit breaker open - event transport unavailable"
                );
                Err(PublishError(anyhow::anyhow!(
                    "circuit breaker open for event transport"
                )))
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                tracing::error!(
                    error = %e,
                    event_type = %event_type,
                    topic = %self.topic,
                    "Failed to publish lifecycle event"
                );
                Err(PublishError(e))
            }
        }
    }
}
