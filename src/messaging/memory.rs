use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::events::{EventPublisher, PublishError};

/// A message accepted by [`InMemoryPublisher`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedEvent {
    pub topic: String,
    pub key: String,
    pub payload: String,
}

impl PublishedEvent {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Default)]
struct Inner {
    published: Vec<PublishedEvent>,
    failing_topics: HashSet<String>,
    unavailable: bool,
}

/// Publisher that keeps every message in memory. Topics can be switched to
/// fail, standing in for broker errors, and the whole publisher can refuse
/// sends the way an open circuit breaker does.
#[derive(Clone, Default)]
pub struct InMemoryPublisher {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_topic(&self, topic: &str) {
        self.inner.lock().await.failing_topics.insert(topic.to_string());
    }

    pub async fn heal_topic(&self, topic: &str) {
        self.inner.lock().await.failing_topics.remove(topic);
    }

    /// Refuse every send with `PublishError::Unavailable` while set
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().await.unavailable = unavailable;
    }

    pub async fn published(&self) -> Vec<PublishedEvent> {
        self.inner.lock().await.published.clone()
    }

    pub async fn published_to(&self, topic: &str) -> Vec<PublishedEvent> {
        self.inner
            .lock()
            .await
            .published
            .iter()
            .filter(|e| e.topic == topic)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), PublishError> {
        let mut inner = self.inner.lock().await;
        if inner.unavailable {
            return Err(PublishError::Unavailable("publisher switched off".to_string()));
        }
        if inner.failing_topics.contains(topic) {
            return Err(PublishError::Failed(format!("topic {} is unavailable", topic)));
        }

        inner.published.push(PublishedEvent {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }
}
