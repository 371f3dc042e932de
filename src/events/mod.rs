// ============================================================================
// Capture Notifications
// ============================================================================
//
// A completed capture produces two independent notifications: one for the
// accounting ledger writer and one for the customer email notifier. Both are
// written to the outbox inside the capture transaction and published after
// commit. Publishing is best-effort from the RPC's point of view; anything
// that fails here is picked up again by the outbox relay.
//
// ============================================================================

use async_trait::async_trait;
use chrono::NaiveDate;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::error::MoneyMovementError;
use crate::metrics::Metrics;
use crate::models::OutboxMessage;
use crate::store::Store;

pub const LEDGER_TOPIC: &str = "ledger";
pub const EMAIL_TOPIC: &str = "email";

/// Operation recorded by the accounting consumer for a captured payment
pub const DEBIT_OPERATION: &str = "DEBIT";

/// Payload on the `ledger` topic
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LedgerMessage {
    pub order_id: String,
    pub user_id: String,
    pub amount: i64,
    pub operation: String,
    /// `YYYY-MM-DD`
    pub date: String,
}

/// Payload on the `email` topic
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EmailMessage {
    pub order_id: String,
    pub user_id: String,
}

/// Everything downstream consumers learn about a captured payment
#[derive(Clone, Debug)]
pub struct CaptureNotification {
    pub pid: String,
    pub user_id: String,
    pub amount: i64,
    pub captured_on: NaiveDate,
}

impl CaptureNotification {
    pub fn ledger_message(&self) -> LedgerMessage {
        LedgerMessage {
            order_id: self.pid.clone(),
            user_id: self.user_id.clone(),
            amount: self.amount,
            operation: DEBIT_OPERATION.to_string(),
            date: self.captured_on.format("%Y-%m-%d").to_string(),
        }
    }

    pub fn email_message(&self) -> EmailMessage {
        EmailMessage {
            order_id: self.pid.clone(),
            user_id: self.user_id.clone(),
        }
    }

    /// One outbox row per topic, keyed by pid
    pub fn outbox_messages(&self) -> crate::error::Result<Vec<OutboxMessage>> {
        Ok(vec![
            OutboxMessage::new(&self.pid, LEDGER_TOPIC, serde_json::to_string(&self.ledger_message())?),
            OutboxMessage::new(&self.pid, EMAIL_TOPIC, serde_json::to_string(&self.email_message())?),
        ])
    }
}

/// Why a publish did not go through
#[derive(Error, Debug)]
pub enum PublishError {
    /// The client refused to contact the bus, e.g. its circuit breaker is
    /// open. The message never reached the broker.
    #[error("event bus unavailable: {0}")]
    Unavailable(String),

    /// The broker was contacted and the send failed
    #[error("publish failed: {0}")]
    Failed(String),
}

/// Sink for serialized events; the message key is the pid
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), PublishError>;
}

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// Published, but the outbox row could not be marked delivered
    #[error("failed to mark outbox row delivered: {0}")]
    Store(#[from] MoneyMovementError),
}

impl DeliveryError {
    /// The bus was never tried, so the attempt should not count against the row
    pub fn is_unavailable(&self) -> bool {
        matches!(self, DeliveryError::Publish(PublishError::Unavailable(_)))
    }
}

/// Publishes outbox rows and records their delivery
pub struct EventEmitter {
    publisher: Arc<dyn EventPublisher>,
    store: Arc<dyn Store>,
    metrics: Arc<Metrics>,
}

impl EventEmitter {
    pub fn new(publisher: Arc<dyn EventPublisher>, store: Arc<dyn Store>, metrics: Arc<Metrics>) -> Self {
        Self {
            publisher,
            store,
            metrics,
        }
    }

    /// Publish one outbox row and mark it delivered
    pub async fn deliver(&self, message: &OutboxMessage) -> Result<(), DeliveryError> {
        let published = self
            .publisher
            .publish(&message.topic, &message.pid, &message.payload)
            .await;
        self.metrics.record_publish(&message.topic, published.is_ok());
        published?;

        self.store.mark_delivered(message.id).await?;
        Ok(())
    }

    /// Publish the notifications of a committed capture concurrently and wait
    /// for every acknowledgement. Failures are logged and left in the outbox
    /// for the relay. Returns how many rows were delivered.
    pub async fn on_captured(&self, messages: &[OutboxMessage]) -> usize {
        let outcomes = join_all(messages.iter().map(|message| async move {
            match self.deliver(message).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        pid = %message.pid,
                        topic = %message.topic,
                        "Failed to publish capture event, leaving it for the outbox relay"
                    );
                    // Only a real broker failure counts towards dead-lettering
                    if !e.is_unavailable() {
                        if let Err(e) = self
                            .store
                            .record_delivery_failure(message.id, &e.to_string(), false)
                            .await
                        {
                            tracing::warn!(error = %e, event_id = %message.id, "Failed to record delivery failure");
                        }
                    }
                    false
                }
            }
        }))
        .await;

        outcomes.into_iter().filter(|delivered| *delivered).count()
    }
}
