use anyhow::{Context, Result};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;

use crate::events::{EventPublisher, PublishError};
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};

/// Kafka-compatible producer for capture notifications.
///
/// Every send waits for the broker acknowledgement. Sends go through a
/// circuit breaker so a dead broker costs one fast error instead of a
/// timeout per notification.
pub struct RedpandaClient {
    producer: FutureProducer,
    circuit_breaker: CircuitBreaker,
    send_timeout: Duration,
}

impl RedpandaClient {
    pub fn new(brokers: &str, message_timeout_ms: u64) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", message_timeout_ms.to_string())
            .set("acks", "all")
            .create()
            .with_context(|| format!("Failed to create producer for brokers {}", brokers))?;

        // Open after 5 failures, probe again after 30s, close after 3 successes
        let cb_config = CircuitBreakerConfig {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 3,
        };

        Ok(Self {
            producer,
            circuit_breaker: CircuitBreaker::new(cb_config),
            send_timeout: Duration::from_millis(message_timeout_ms),
        })
    }

    /// Shared handle to the breaker, for health and metrics reporting
    pub fn circuit_breaker(&self) -> CircuitBreaker {
        self.circuit_breaker.clone()
    }
}

#[async_trait]
impl EventPublisher for RedpandaClient {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), PublishError> {
        let result = self
            .circuit_breaker
            .call(async {
                let record = FutureRecord::to(topic).key(key).payload(payload);

                self.producer
                    .send(record, Timeout::After(self.send_timeout))
                    .await
                    .map(|_| ())
                    .map_err(|(e, _)| anyhow::anyhow!("Kafka send error: {}", e))
            })
            .await;

        match result {
            Ok(()) => {
                tracing::info!(topic, key, "Published to Redpanda");
                Ok(())
            }
            Err(CircuitBreakerError::CircuitOpen) => {
                tracing::error!(topic, "Circuit breaker open - Redpanda unavailable");
                Err(PublishError::Unavailable("circuit breaker open for Redpanda".to_string()))
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                tracing::error!(error = %e, topic, key, "Failed to publish to Redpanda");
                Err(PublishError::Failed(e.to_string()))
            }
        }
    }
}
