use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{OutboxError, OutboxResult};
use crate::message::{OperationType, OutboxMessage};

/// Delivers one outbox message to its side effect (email, broker, ...).
///
/// Delivery is at-least-once: a handler may see the same message again after a failed commit,
/// so side effects should tolerate duplicates.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &OutboxMessage) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler<F>(F);

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(OutboxMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(OutboxMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, message: &OutboxMessage) -> anyhow::Result<()> {
        (self.0)(message.clone()).await
    }
}

/// One handler per operation type.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<OperationType, Arc<dyn MessageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, op: OperationType, handler: Arc<dyn MessageHandler>) -> OutboxResult<()> {
        match self.handlers.entry(op) {
            Entry::Occupied(_) => Err(OutboxError::DuplicateHandler(op)),
            Entry::Vacant(slot) => {
                slot.insert(handler);
                Ok(())
            }
        }
    }

    pub fn get(&self, op: OperationType) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(&op).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let registry = HandlerRegistry::new();
        registry
            .register(
                OperationType::UserCreatedMq,
                Arc::new(handler_fn(|_| async { Ok(()) })),
            )
            .unwrap();

        let err = registry
            .register(
                OperationType::UserCreatedMq,
                Arc::new(handler_fn(|_| async { Ok(()) })),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            OutboxError::DuplicateHandler(OperationType::UserCreatedMq)
        ));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_fn_handler_sees_message() {
        let handler = handler_fn(|message: OutboxMessage| async move {
            anyhow::ensure!(message.payload == b"ping", "unexpected payload");
            Ok(())
        });

        let ok = OutboxMessage::new(OperationType::UserCreatedEmail, b"ping".to_vec());
        let bad = OutboxMessage::new(OperationType::UserCreatedEmail, b"pong".to_vec());
        assert!(handler.handle(&ok).await.is_ok());
        assert!(handler.handle(&bad).await.is_err());
    }
}
