use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use money_movement::config::Settings;
use money_movement::events::EventEmitter;
use money_movement::health::{HealthProbe, HealthRegistry, HealthStatus, GRPC_SERVICE_NAME, OUTBOX_RELAY};
use money_movement::messaging::RedpandaClient;
use money_movement::metrics::{self, Metrics};
use money_movement::relay::OutboxRelay;
use money_movement::service::MoneyMovementService;
use money_movement::store::{PostgresStore, Store};
use money_movement::MoneyMovementEngine;

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.logging.level)))
        .init();

    tracing::info!("Starting money movement service");

    // === 1. Postgres ===
    tracing::info!(max_connections = settings.database.max_connections, "Connecting to Postgres...");
    let postgres = PostgresStore::connect(&settings.database.url, settings.database.max_connections).await?;
    if settings.database.run_migrations {
        postgres.migrate().await?;
        tracing::info!("Database migrations applied");
    }
    let store: Arc<dyn Store> = Arc::new(postgres);

    // === 2. Metrics and health ===
    let metrics = Arc::new(Metrics::new()?);
    let health = HealthRegistry::new();
    tracing::info!("Metrics registry created with {} metrics", metrics.registry().gather().len());

    // actix-web runs on its own system in a dedicated thread
    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_health = health.clone();
    let metrics_port = settings.metrics.port;
    std::thread::spawn(move || {
        let result = actix_web::rt::System::new().block_on(metrics::start_metrics_server(
            metrics_registry,
            metrics_health,
            metrics_port,
        ));
        if let Err(e) = result {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    // === 3. Event bus ===
    let redpanda = Arc::new(RedpandaClient::new(
        &settings.kafka.brokers,
        settings.kafka.message_timeout_ms,
    )?);
    let breaker = redpanda.circuit_breaker();
    let emitter = Arc::new(EventEmitter::new(redpanda, store.clone(), metrics.clone()));

    // === 4. Engine ===
    let engine = Arc::new(MoneyMovementEngine::new(store.clone(), emitter.clone(), metrics.clone()));

    // === 5. Background tasks ===
    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health.update(OUTBOX_RELAY, HealthStatus::Healthy, None).await;

    let probe = HealthProbe::new(health.clone(), store.clone(), Some(breaker), health_reporter, metrics.clone());
    probe.check().await;
    let probe_task = probe.spawn(HEALTH_CHECK_INTERVAL);

    let relay = OutboxRelay::new(
        store.clone(),
        emitter,
        metrics.clone(),
        health.clone(),
        settings.relay.to_relay_config(),
    );
    let relay_task = relay.spawn();

    // === 6. gRPC ===
    let addr: SocketAddr = settings.server.grpc_addr.parse()?;
    tracing::info!(%addr, service = GRPC_SERVICE_NAME, "Serving gRPC");

    tonic::transport::Server::builder()
        .add_service(health_service)
        .add_service(MoneyMovementService::new(engine).into_server())
        .serve_with_shutdown(addr, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    relay_task.abort();
    probe_task.abort();
    tracing::info!("Money movement service stopped");

    Ok(())
}
