use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::OutboxResult;
use crate::message::{MessageStatus, OutboxMessage};

/// Storage for outbox messages.
///
/// Writes go through a store transaction so the business write and the outbox row commit
/// together. Dropping a transaction without calling [`EventStore::commit`] rolls it back.
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    type Tx: Send;

    async fn begin(&self) -> OutboxResult<Self::Tx>;

    async fn commit(&self, tx: Self::Tx) -> OutboxResult<()>;

    /// Insert a message within the caller's transaction.
    async fn insert(&self, tx: &mut Self::Tx, message: &OutboxMessage) -> OutboxResult<()>;

    /// Most recently created committed message with `status`, if any.
    async fn fetch_by_status(&self, status: MessageStatus) -> OutboxResult<Option<OutboxMessage>>;

    /// Set the status of a message. Fails with `EventNotFound` when the id does not exist.
    async fn update_status(
        &self,
        tx: &mut Self::Tx,
        id: Uuid,
        status: MessageStatus,
    ) -> OutboxResult<()>;

    /// Delete at most `batch_size` messages with `status` last updated more than `older_than`
    /// ago. Returns the number of rows removed.
    async fn delete_batch(
        &self,
        status: MessageStatus,
        batch_size: i64,
        older_than: Duration,
    ) -> OutboxResult<u64>;
}
