use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::events::EventEmitter;
use crate::health::{HealthRegistry, HealthStatus, OUTBOX_RELAY};
use crate::metrics::Metrics;
use crate::models::OutboxMessage;
use crate::store::Store;
use crate::utils::{retry_with_backoff, RetryConfig, RetryResult};

// ============================================================================
// Outbox Relay
// ============================================================================
//
// Redelivers capture notifications that the post-commit emitter could not
// publish. Each poll takes a batch of undelivered rows, oldest first, and
// publishes each with a short backoff. A row that still fails has its attempt
// counted; once it reaches `max_attempts` it is dead-lettered and left for
// an operator.
//
// Rows younger than `min_age` are left alone so the relay does not race the
// post-commit publish of a capture that is still in flight. When the
// publisher reports itself unavailable (open circuit breaker) the round ends
// without touching attempt counts; only real broker failures count.
//
// Delivery is at-least-once. Consumers dedupe on the message key (the pid).
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
    /// Rows newer than this are skipped on a poll
    pub min_age: Duration,
    /// Failed delivery rounds before a row is dead-lettered
    pub max_attempts: i32,
    /// Backoff used within a single delivery round
    pub retry: RetryConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2000),
            batch_size: 100,
            min_age: Duration::from_millis(2000),
            max_attempts: 5,
            retry: RetryConfig::default(),
        }
    }
}

/// What one poll accomplished
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub failed: usize,
    pub dead_lettered: usize,
    /// Rows left untouched because the publisher was unavailable
    pub deferred: usize,
}

pub struct OutboxRelay {
    store: Arc<dyn Store>,
    emitter: Arc<EventEmitter>,
    metrics: Arc<Metrics>,
    health: HealthRegistry,
    config: RelayConfig,
}

impl OutboxRelay {
    pub fn new(
        store: Arc<dyn Store>,
        emitter: Arc<EventEmitter>,
        metrics: Arc<Metrics>,
        health: HealthRegistry,
        config: RelayConfig,
    ) -> Self {
        Self {
            store,
            emitter,
            metrics,
            health,
            config,
        }
    }

    /// Deliver one batch of pending rows
    pub async fn drain_once(&self) -> Result<DrainReport> {
        let min_age = chrono::Duration::from_std(self.config.min_age).unwrap_or_else(|_| chrono::Duration::zero());
        let pending = self
            .store
            .pending_outbox(Utc::now() - min_age, self.config.batch_size)
            .await?;
        let mut report = DrainReport::default();

        if !pending.is_empty() {
            tracing::debug!(count = pending.len(), "Relaying pending outbox rows");
        }

        for (index, message) in pending.iter().enumerate() {
            let outcome = retry_with_backoff(&self.config.retry, move |_attempt| self.emitter.deliver(message)).await;

            match outcome {
                RetryResult::Success(()) => {
                    tracing::info!(event_id = %message.id, pid = %message.pid, topic = %message.topic, "Relayed outbox row");
                    report.delivered += 1;
                }
                RetryResult::Failed { error, .. } if error.is_unavailable() => {
                    report.deferred = pending.len() - index;
                    tracing::warn!(
                        deferred = report.deferred,
                        error = %error,
                        "Publisher unavailable, ending relay round"
                    );
                    break;
                }
                RetryResult::Failed { error, attempts } => {
                    report.failed += 1;
                    if self.park_failure(message, &error.to_string(), attempts).await? {
                        report.dead_lettered += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Count a failed round for `message`; returns true when it was dead-lettered
    async fn park_failure(&self, message: &OutboxMessage, error: &str, tries: u32) -> Result<bool> {
        let dead_letter = message.attempts + 1 >= self.config.max_attempts;
        self.store.record_delivery_failure(message.id, error, dead_letter).await?;

        if dead_letter {
            self.metrics.record_dead_letter();
            tracing::error!(
                event_id = %message.id,
                pid = %message.pid,
                topic = %message.topic,
                attempts = message.attempts + 1,
                error,
                "Outbox row dead-lettered"
            );
        } else {
            tracing::warn!(
                event_id = %message.id,
                pid = %message.pid,
                topic = %message.topic,
                tries,
                error,
                "Outbox delivery failed, will retry on next poll"
            );
        }

        Ok(dead_letter)
    }

    async fn report_health(&self, outcome: &Result<DrainReport>) {
        let status = match outcome {
            Ok(report) if report.deferred > 0 => {
                HealthStatus::Degraded(format!("publisher unavailable, {} rows deferred", report.deferred))
            }
            Ok(report) if report.failed == 0 => HealthStatus::Healthy,
            Ok(report) => HealthStatus::Degraded(format!("{} deliveries failed", report.failed)),
            Err(e) => HealthStatus::Unhealthy(e.to_string()),
        };
        self.health.update(OUTBOX_RELAY, status, None).await;
    }

    /// Poll on `poll_interval` until the task is aborted
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                interval_ms = self.config.poll_interval.as_millis() as u64,
                batch_size = self.config.batch_size,
                "Starting outbox relay"
            );

            let mut ticker = tokio::time::interval(self.config.poll_interval);
            loop {
                ticker.tick().await;

                let outcome = self.drain_once().await;
                match &outcome {
                    Ok(report) if report.delivered + report.failed + report.deferred > 0 => {
                        tracing::info!(
                            delivered = report.delivered,
                            failed = report.failed,
                            dead_lettered = report.dead_lettered,
                            deferred = report.deferred,
                            "Outbox relay poll complete"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "Outbox relay poll failed"),
                }
                self.report_health(&outcome).await;
            }
        })
    }
}
