/// Kafka event producer and the user-created outbox handler
use crate::error::{IdentityError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use transactional_outbox::{MessageHandler, OutboxMessage};
use uuid::Uuid;

/// Message queue seam used by [`UserEventsHandler`].
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()>;
}

/// Kafka event producer service
#[derive(Clone)]
pub struct KafkaEventProducer {
    producer: FutureProducer,
    send_timeout: Duration,
}

impl KafkaEventProducer {
    /// Create a new Kafka event producer
    ///
    /// ## Arguments
    ///
    /// * `brokers` - Comma-separated list of Kafka brokers
    /// * `send_timeout` - How long a send may wait in the producer queue
    pub fn new(brokers: &str, send_timeout: Duration) -> Result<Self> {
        let producer = rdkafka::config::ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("client.id", "identity-service")
            .set("enable.idempotence", "true")
            .create::<FutureProducer>()
            .map_err(|e| IdentityError::Publish(format!("Failed to create Kafka producer: {}", e)))?;

        Ok(Self {
            producer,
            send_timeout,
        })
    }
}

#[async_trait]
impl EventPublisher for KafkaEventProducer {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        self.producer
            .send(record, self.send_timeout)
            .await
            .map_err(|(error, _)| {
                warn!("Failed to send Kafka event to topic {}: {:?}", topic, error);
                IdentityError::Publish(format!(
                    "Failed to publish event to Kafka topic {}: {}",
                    topic, error
                ))
            })?;

        Ok(())
    }
}

/// Publisher used when no broker is configured. Events are logged and dropped.
#[derive(Debug, Clone, Default)]
pub struct LogOnlyPublisher;

#[async_trait]
impl EventPublisher for LogOnlyPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()> {
        info!(
            topic,
            key,
            bytes = payload.len(),
            "No Kafka brokers configured; event logged only"
        );
        Ok(())
    }
}

/// Payload of a `UserCreatedMq` outbox message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCreatedEvent {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Forwards `UserCreatedMq` payloads to the user events topic, keyed by user id.
pub struct UserEventsHandler {
    publisher: Arc<dyn EventPublisher>,
    topic: String,
}

impl UserEventsHandler {
    pub fn new(publisher: Arc<dyn EventPublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl MessageHandler for UserEventsHandler {
    async fn handle(&self, message: &OutboxMessage) -> anyhow::Result<()> {
        let event: UserCreatedEvent = message.payload_json()?;
        let key = event.id.to_string();

        self.publisher
            .publish(&self.topic, &key, &message.payload)
            .await?;

        info!(event_id = %message.id, user_id = %event.id, topic = %self.topic, "User created event published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;
    use transactional_outbox::OperationType;

    #[derive(Default)]
    struct RecordingPublisher {
        fail: bool,
        published: Mutex<Vec<(String, String, Vec<u8>)>>,
    }

    #[async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()> {
            if self.fail {
                return Err(IdentityError::Publish("broker down".into()));
            }
            self.published
                .lock()
                .await
                .push((topic.to_string(), key.to_string(), payload.to_vec()));
            Ok(())
        }
    }

    fn user_created_message() -> (UserCreatedEvent, OutboxMessage) {
        let event = UserCreatedEvent {
            id: Uuid::new_v4(),
            name: "ada".to_string(),
            email: "ada@example.com".to_string(),
            created_at: Utc::now(),
        };
        let message = OutboxMessage::new(
            OperationType::UserCreatedMq,
            serde_json::to_vec(&event).unwrap(),
        );
        (event, message)
    }

    #[tokio::test]
    async fn test_handler_publishes_payload_keyed_by_user() {
        let publisher = Arc::new(RecordingPublisher::default());
        let handler = UserEventsHandler::new(publisher.clone(), "identity.user.created");
        let (event, message) = user_created_message();

        handler.handle(&message).await.unwrap();

        let published = publisher.published.lock().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "identity.user.created");
        assert_eq!(published[0].1, event.id.to_string());
        assert_eq!(published[0].2, message.payload);
    }

    #[tokio::test]
    async fn test_publish_failure_fails_handler() {
        let publisher = Arc::new(RecordingPublisher {
            fail: true,
            ..Default::default()
        });
        let handler = UserEventsHandler::new(publisher, "identity.user.created");
        let (_, message) = user_created_message();

        assert!(handler.handle(&message).await.is_err());
    }

    #[tokio::test]
    async fn test_log_only_publisher_accepts_events() {
        LogOnlyPublisher
            .publish("identity.user.created", "key", b"{}")
            .await
            .unwrap();
    }
}
