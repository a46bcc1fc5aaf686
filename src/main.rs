use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use orders_service::cache::RedisIdempotencyCache;
use orders_service::config::AppConfig;
use orders_service::events::{EventPublisher, KafkaPublisher, NoopPublisher};
use orders_service::http::start_api_server;
use orders_service::lifecycle::OrderLifecycle;
use orders_service::metrics::{start_metrics_server, Metrics};
use orders_service::outbox::OutboxRelay;
use orders_service::store::PgOrderStore;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Structured logging with environment-based filtering.
    // Example: RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,orders_service=debug")),
        )
        .init();

    let config = AppConfig::from_env();
    tracing::info!("Starting orders-service");

    // === 1. Postgres pool + schema ===
    tracing::info!("Connecting to Postgres...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(config.store_timeout)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let store = Arc::new(PgOrderStore::new(pool, config.store_timeout));

    // === 2. Redis idempotency cache ===
    tracing::info!("Connecting to Redis...");
    let cache = Arc::new(
        RedisIdempotencyCache::connect(&config.redis_url, config.cache_timeout).await?,
    );

    // === 3. Event transport (capability chosen here, never inside the core) ===
    let publisher: Arc<dyn EventPublisher> = if config.events_disabled {
        tracing::warn!("Event transport disabled, lifecycle events will be skipped");
        Arc::new(NoopPublisher)
    } else {
        Arc::new(KafkaPublisher::new(&config.kafka_brokers, &config.kafka_topic)?)
    };

    // === 4. Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                tracing::error!("Failed to build metrics runtime: {}", e);
                return;
            }
        };
        rt.block_on(async {
            if let Err(e) = start_metrics_server(metrics_registry, metrics_port).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    });

    // === 5. Orchestrator ===
    let lifecycle = Arc::new(OrderLifecycle::new(
        store.clone(),
        cache,
        publisher.clone(),
        metrics.clone(),
        config.idempotency_ttl,
    ));

    // === 6. Outbox relay (durable path for the terminal event) ===
    let relay = OutboxRelay::new(
        store,
        publisher,
        metrics,
        config.outbox_poll_interval,
        config.outbox_batch_size,
    );
    actix_web::rt::spawn(relay.run());

    // === 7. API server ===
    start_api_server(lifecycle, config.http_port).await?;

    // Give in-flight publishes a moment on shutdown.
    tokio::time::sleep(Duration::from_millis(100)).await;

    Ok(())
}
