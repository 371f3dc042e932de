use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;

use crate::health::HealthRegistry;

/// Serve `/metrics` and `/health` until the server stops.
/// Runs on its own actix system; see `main`.
pub async fn start_metrics_server(
    registry: Arc<Registry>,
    health: HealthRegistry,
    port: u16,
) -> std::io::Result<()> {
    tracing::info!(port, "Starting metrics server on /metrics and /health");

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(registry.clone()))
            .app_data(web::Data::new(health.clone()))
            .route("/metrics", web::get().to(metrics_handler))
            .route("/health", web::get().to(health_handler))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

async fn metrics_handler(registry: web::Data<Arc<Registry>>) -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

async fn health_handler(health: web::Data<HealthRegistry>) -> impl Responder {
    let snapshot = health.snapshot().await;
    let body = serde_json::json!({
        "status": snapshot.overall_status.label(),
        "service": "money-movement",
        "components": snapshot
            .components
            .values()
            .map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status.label(),
                "details": c.details,
            }))
            .collect::<Vec<_>>(),
    });

    if snapshot.overall_status.is_unhealthy() {
        HttpResponse::ServiceUnavailable().json(body)
    } else {
        HttpResponse::Ok().json(body)
    }
}
