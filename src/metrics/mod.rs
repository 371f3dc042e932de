// Private module declaration
mod server;

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec,
    IntGauge, Opts, Registry,
};

use crate::error::ErrorKind;
use crate::utils::CircuitState;

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for the money movement service
// ============================================================================
//
// Provides metrics for:
// - Authorize / Capture outcomes and latency
// - Event publishing per topic
// - Outbox dead-lettering
// - Circuit breaker state of the event bus client
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Payment metrics
    pub payments_authorized: IntCounter,
    pub payments_captured: IntCounter,
    pub payment_failures: IntCounterVec,
    pub rpc_duration: HistogramVec,

    // Event delivery metrics
    pub events_published: IntCounterVec,
    pub events_failed: IntCounterVec,
    pub outbox_dead_lettered: IntCounter,

    // Circuit breaker metrics
    pub circuit_breaker_state: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let payments_authorized = IntCounter::new(
            "payments_authorized_total",
            "Payments whose funds were moved into escrow",
        )?;
        registry.register(Box::new(payments_authorized.clone()))?;

        let payments_captured = IntCounter::new(
            "payments_captured_total",
            "Payments whose escrowed funds were released to the merchant",
        )?;
        registry.register(Box::new(payments_captured.clone()))?;

        let payment_failures = IntCounterVec::new(
            Opts::new("payment_failures_total", "Failed Authorize/Capture calls"),
            &["operation", "kind"],
        )?;
        registry.register(Box::new(payment_failures.clone()))?;

        let rpc_duration = HistogramVec::new(
            HistogramOpts::new("rpc_duration_seconds", "Authorize/Capture call duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation"],
        )?;
        registry.register(Box::new(rpc_duration.clone()))?;

        let events_published = IntCounterVec::new(
            Opts::new("events_published_total", "Events acknowledged by the event bus"),
            &["topic"],
        )?;
        registry.register(Box::new(events_published.clone()))?;

        let events_failed = IntCounterVec::new(
            Opts::new("events_failed_total", "Event publish attempts that failed"),
            &["topic"],
        )?;
        registry.register(Box::new(events_failed.clone()))?;

        let outbox_dead_lettered = IntCounter::new(
            "outbox_dead_lettered_total",
            "Outbox rows parked after exhausting delivery attempts",
        )?;
        registry.register(Box::new(outbox_dead_lettered.clone()))?;

        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Event bus circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        Ok(Self {
            registry,
            payments_authorized,
            payments_captured,
            payment_failures,
            rpc_duration,
            events_published,
            events_failed,
            outbox_dead_lettered,
            circuit_breaker_state,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record the outcome of one Authorize or Capture call
    pub fn record_rpc(&self, operation: &str, duration_secs: f64, failure: Option<ErrorKind>) {
        self.rpc_duration.with_label_values(&[operation]).observe(duration_secs);
        if let Some(kind) = failure {
            self.payment_failures.with_label_values(&[operation, kind.as_str()]).inc();
        }
    }

    pub fn record_publish(&self, topic: &str, success: bool) {
        if success {
            self.events_published.with_label_values(&[topic]).inc();
        } else {
            self.events_failed.with_label_values(&[topic]).inc();
        }
    }

    pub fn record_dead_letter(&self) {
        self.outbox_dead_lettered.inc();
    }

    pub fn update_circuit_breaker_state(&self, state: CircuitState) {
        let value = match state {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        };
        self.circuit_breaker_state.set(value);
    }
}
