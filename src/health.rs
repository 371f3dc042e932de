use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tonic_health::server::HealthReporter;
use tonic_health::ServingStatus;

use crate::metrics::Metrics;
use crate::store::Store;
use crate::utils::{CircuitBreaker, CircuitState};

// ============================================================================
// Health Monitoring
// ============================================================================
//
// Tracks the health of the service's dependencies and aggregates them into a
// single status. The aggregate drives both the HTTP /health endpoint and the
// gRPC health service the gateway's load balancer polls.
//
// ============================================================================

/// gRPC service name reported to the health service
pub const GRPC_SERVICE_NAME: &str = "money_movement.MoneyMovementService";

pub const POSTGRES: &str = "postgres";
pub const REDPANDA: &str = "redpanda";
pub const OUTBOX_RELAY: &str = "outbox_relay";

/// Health status of a component
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded(_) => "degraded",
            HealthStatus::Unhealthy(_) => "unhealthy",
        }
    }
}

/// Health information for a component
#[derive(Debug, Clone)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    pub details: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SystemHealth {
    pub overall_status: HealthStatus,
    pub components: HashMap<String, ComponentHealth>,
    pub check_time: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn update(&self, component: &str, status: HealthStatus, details: Option<String>) {
        tracing::debug!(component, status = ?status, "Updated component health");

        let health = ComponentHealth {
            name: component.to_string(),
            status,
            last_check: Utc::now(),
            details,
        };
        self.components.write().await.insert(component.to_string(), health);
    }

    pub async fn snapshot(&self) -> SystemHealth {
        let components = self.components.read().await.clone();
        SystemHealth {
            overall_status: compute_overall_status(&components),
            components,
            check_time: Utc::now(),
        }
    }
}

fn compute_overall_status(components: &HashMap<String, ComponentHealth>) -> HealthStatus {
    let mut has_degraded = false;
    let mut unhealthy_components = Vec::new();

    for (name, health) in components {
        match &health.status {
            HealthStatus::Unhealthy(msg) => {
                unhealthy_components.push(format!("{}: {}", name, msg));
            }
            HealthStatus::Degraded(_) => {
                has_degraded = true;
            }
            HealthStatus::Healthy => {}
        }
    }

    if !unhealthy_components.is_empty() {
        unhealthy_components.sort();
        HealthStatus::Unhealthy(unhealthy_components.join(", "))
    } else if has_degraded {
        HealthStatus::Degraded("Some components degraded".to_string())
    } else {
        HealthStatus::Healthy
    }
}

pub fn breaker_health(state: CircuitState) -> HealthStatus {
    match state {
        CircuitState::Closed => HealthStatus::Healthy,
        CircuitState::HalfOpen => HealthStatus::Degraded("Circuit breaker half-open".to_string()),
        CircuitState::Open => HealthStatus::Unhealthy("Circuit breaker open".to_string()),
    }
}

// ============================================================================
// Periodic probe
// ============================================================================

pub struct HealthProbe {
    registry: HealthRegistry,
    store: Arc<dyn Store>,
    breaker: Option<CircuitBreaker>,
    reporter: HealthReporter,
    metrics: Arc<Metrics>,
}

impl HealthProbe {
    pub fn new(
        registry: HealthRegistry,
        store: Arc<dyn Store>,
        breaker: Option<CircuitBreaker>,
        reporter: HealthReporter,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry,
            store,
            breaker,
            reporter,
            metrics,
        }
    }

    /// Check every dependency once and publish the result
    pub async fn check(&self) -> SystemHealth {
        match self.store.ping().await {
            Ok(()) => self.registry.update(POSTGRES, HealthStatus::Healthy, None).await,
            Err(e) => {
                self.registry
                    .update(POSTGRES, HealthStatus::Unhealthy(e.to_string()), None)
                    .await
            }
        }

        if let Some(breaker) = &self.breaker {
            let state = breaker.get_state().await;
            self.metrics.update_circuit_breaker_state(state);
            // An open breaker only delays notifications; the ledger keeps working
            let status = match breaker_health(state) {
                HealthStatus::Unhealthy(msg) => HealthStatus::Degraded(msg),
                other => other,
            };
            self.registry.update(REDPANDA, status, None).await;
        }

        let health = self.registry.snapshot().await;
        let serving = if health.overall_status.is_unhealthy() {
            ServingStatus::NotServing
        } else {
            ServingStatus::Serving
        };

        self.reporter.set_service_status(GRPC_SERVICE_NAME, serving).await;
        self.reporter.set_service_status("", serving).await;

        health
    }

    /// Run `check` on a fixed interval in the background
    pub fn spawn(self, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let health = self.check().await;
                match health.overall_status {
                    HealthStatus::Healthy => tracing::debug!("System health check: Healthy"),
                    HealthStatus::Degraded(ref msg) => {
                        tracing::warn!("System health check: Degraded - {}", msg)
                    }
                    HealthStatus::Unhealthy(ref msg) => {
                        tracing::error!("System health check: Unhealthy - {}", msg)
                    }
                }
            }
        })
    }
}
