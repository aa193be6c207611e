//! Process-local event store with real transaction semantics.
//!
//! Writes are staged on the transaction and applied on commit; a dropped transaction discards
//! them. Failure injection hooks let tests exercise the relay's retry paths.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{OutboxError, OutboxResult};
use crate::message::{MessageStatus, OutboxMessage};
use crate::store::EventStore;

#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    messages: Mutex<Vec<OutboxMessage>>,
    fail_commits: AtomicUsize,
    fail_fetches: AtomicUsize,
    commits: AtomicUsize,
}

/// Pending writes of one in-memory transaction.
#[derive(Debug, Default)]
pub struct MemoryTx {
    inserts: Vec<OutboxMessage>,
    updates: Vec<(Uuid, MessageStatus)>,
}

impl MemoryTx {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty()
    }
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` commits fail without applying their writes.
    pub fn fail_next_commits(&self, n: usize) {
        self.fail_commits.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` fetches fail.
    pub fn fail_next_fetches(&self, n: usize) {
        self.fail_fetches.store(n, Ordering::SeqCst);
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Insert an already committed message as-is, timestamps included.
    pub async fn seed(&self, message: OutboxMessage) {
        self.messages.lock().await.push(message);
    }

    pub async fn snapshot(&self) -> Vec<OutboxMessage> {
        self.messages.lock().await.clone()
    }

    pub async fn get(&self, id: Uuid) -> Option<OutboxMessage> {
        self.messages.lock().await.iter().find(|m| m.id == id).cloned()
    }

    pub async fn count_by_status(&self, status: MessageStatus) -> usize {
        self.messages
            .lock()
            .await
            .iter()
            .filter(|m| m.status == status)
            .count()
    }

    fn take_injected(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> OutboxResult<MemoryTx> {
        Ok(MemoryTx::default())
    }

    async fn commit(&self, tx: MemoryTx) -> OutboxResult<()> {
        if Self::take_injected(&self.fail_commits) {
            return Err(anyhow::anyhow!("injected commit failure").into());
        }

        let mut messages = self.messages.lock().await;
        messages.extend(tx.inserts);

        let now = Utc::now();
        for (id, status) in tx.updates {
            if let Some(message) = messages.iter_mut().find(|m| m.id == id) {
                message.status = status;
                message.updated_at = now;
            }
        }

        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn insert(&self, tx: &mut MemoryTx, message: &OutboxMessage) -> OutboxResult<()> {
        tx.inserts.push(message.clone());
        Ok(())
    }

    async fn fetch_by_status(&self, status: MessageStatus) -> OutboxResult<Option<OutboxMessage>> {
        if Self::take_injected(&self.fail_fetches) {
            return Err(anyhow::anyhow!("injected fetch failure").into());
        }

        // max_by_key keeps the last of equal keys, so ties go to the latest insert
        Ok(self
            .messages
            .lock()
            .await
            .iter()
            .filter(|m| m.status == status)
            .max_by_key(|m| m.created_at)
            .cloned())
    }

    async fn update_status(
        &self,
        tx: &mut MemoryTx,
        id: Uuid,
        status: MessageStatus,
    ) -> OutboxResult<()> {
        let staged = tx.inserts.iter().any(|m| m.id == id);
        let committed = self.messages.lock().await.iter().any(|m| m.id == id);
        if !staged && !committed {
            return Err(OutboxError::EventNotFound(id));
        }

        if let Some(message) = tx.inserts.iter_mut().find(|m| m.id == id) {
            message.status = status;
        } else {
            tx.updates.push((id, status));
        }
        Ok(())
    }

    async fn delete_batch(
        &self,
        status: MessageStatus,
        batch_size: i64,
        older_than: Duration,
    ) -> OutboxResult<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than)
                .map_err(|e| anyhow::anyhow!("Retention out of range: {e}"))?;
        let limit = usize::try_from(batch_size).unwrap_or(0);

        let mut messages = self.messages.lock().await;
        let mut deleted = 0usize;
        messages.retain(|m| {
            let expired = m.status == status && m.updated_at < cutoff;
            if expired && deleted < limit {
                deleted += 1;
                false
            } else {
                true
            }
        });

        Ok(deleted as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::OperationType;

    #[tokio::test]
    async fn test_dropped_tx_discards_writes() {
        let store = InMemoryEventStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            let message = OutboxMessage::new(OperationType::UserCreatedMq, vec![]);
            store.insert(&mut tx, &message).await.unwrap();
            assert!(!tx.is_empty());
        }
        assert!(store.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_uncommitted_rows_invisible_to_fetch() {
        let store = InMemoryEventStore::new();
        let mut tx = store.begin().await.unwrap();
        let message = OutboxMessage::new(OperationType::UserCreatedMq, vec![]);
        store.insert(&mut tx, &message).await.unwrap();

        assert!(store
            .fetch_by_status(MessageStatus::Unhandled)
            .await
            .unwrap()
            .is_none());

        store.commit(tx).await.unwrap();
        let fetched = store.fetch_by_status(MessageStatus::Unhandled).await.unwrap();
        assert_eq!(fetched.unwrap().id, message.id);
    }

    #[tokio::test]
    async fn test_fetch_prefers_newest() {
        let store = InMemoryEventStore::new();
        let mut older = OutboxMessage::new(OperationType::UserCreatedMq, vec![]);
        older.created_at = Utc::now() - chrono::Duration::seconds(10);
        let newer = OutboxMessage::new(OperationType::UserCreatedEmail, vec![]);
        store.seed(older).await;
        store.seed(newer.clone()).await;

        let fetched = store.fetch_by_status(MessageStatus::Unhandled).await.unwrap();
        assert_eq!(fetched.unwrap().id, newer.id);
    }

    #[tokio::test]
    async fn test_update_unknown_id() {
        let store = InMemoryEventStore::new();
        let mut tx = store.begin().await.unwrap();
        let id = Uuid::new_v4();
        assert!(matches!(
            store.update_status(&mut tx, id, MessageStatus::Handled).await,
            Err(OutboxError::EventNotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let store = InMemoryEventStore::new();
        store.fail_next_fetches(1);
        store.fail_next_commits(1);

        assert!(store.fetch_by_status(MessageStatus::Unhandled).await.is_err());
        assert!(store.fetch_by_status(MessageStatus::Unhandled).await.is_ok());

        assert!(store.commit(MemoryTx::default()).await.is_err());
        assert!(store.commit(MemoryTx::default()).await.is_ok());
        assert_eq!(store.commit_count(), 1);
    }
}
