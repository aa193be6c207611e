//! Background delivery of outbox messages.
//!
//! The relay runs two loops:
//! - **push loop**: picks one unhandled message at a time, runs its handler and marks it handled
//!   in the same store transaction. Failures leave the message unhandled and are retried after
//!   `retry_backoff`, so delivery is at-least-once.
//! - **delete loop**: on startup and then every `delete_period`, removes handled messages older
//!   than `retention` in batches of `delete_batch_size`.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{OutboxError, OutboxResult};
use crate::handler::{HandlerRegistry, MessageHandler};
use crate::message::{MessageStatus, OperationType, OutboxMessage};
use crate::metrics::OutboxMetrics;
use crate::store::EventStore;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Rows removed per delete statement
    pub delete_batch_size: i64,
    /// Pause between delete batches
    pub delete_interval: Duration,
    /// Idle poll period and pause after a failed dispatch
    pub retry_backoff: Duration,
    /// Period of the delete loop
    pub delete_period: Duration,
    /// Handled messages younger than this are kept
    pub retention: Duration,
    /// Pause after a failed fetch; zero retries immediately
    pub fetch_error_backoff: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            delete_batch_size: 100,
            delete_interval: Duration::from_millis(500),
            retry_backoff: Duration::from_secs(5),
            delete_period: Duration::from_secs(24 * 60 * 60),
            retention: Duration::from_secs(24 * 60 * 60),
            fetch_error_backoff: Duration::ZERO,
        }
    }
}

/// Outbox relay over an [`EventStore`].
pub struct OutboxRelay<S: EventStore> {
    store: Arc<S>,
    handlers: HandlerRegistry,
    notify_tx: mpsc::Sender<()>,
    notify_rx: Mutex<mpsc::Receiver<()>>,
    config: RelayConfig,
    metrics: Option<OutboxMetrics>,
}

impl<S: EventStore> OutboxRelay<S> {
    pub fn new(store: Arc<S>, config: RelayConfig) -> Self {
        // Capacity 1: a pending wake-up already covers every message written before it is seen
        let (notify_tx, notify_rx) = mpsc::channel(1);
        Self {
            store,
            handlers: HandlerRegistry::new(),
            notify_tx,
            notify_rx: Mutex::new(notify_rx),
            config,
            metrics: None,
        }
    }

    /// Create a relay that also updates Prometheus metrics.
    pub fn new_with_metrics(store: Arc<S>, config: RelayConfig, metrics: OutboxMetrics) -> Self {
        Self {
            metrics: Some(metrics),
            ..Self::new(store, config)
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Register the handler for `op`. A second handler for the same type is rejected.
    ///
    /// Handlers may be registered while the loops are running; the next dispatch picks them up.
    pub fn register<H>(&self, op: OperationType, handler: H) -> OutboxResult<()>
    where
        H: MessageHandler + 'static,
    {
        self.handlers.register(op, Arc::new(handler))?;
        info!(op = %op, "Outbox handler registered");
        Ok(())
    }

    /// Insert an unhandled message in the caller's transaction and wake the push loop.
    ///
    /// The wake-up may arrive before the caller commits; call [`OutboxRelay::notify`] after the
    /// commit to avoid waiting for the next poll.
    pub async fn add_message(
        &self,
        tx: &mut S::Tx,
        op: OperationType,
        payload: Vec<u8>,
    ) -> OutboxResult<Uuid> {
        let message = OutboxMessage::new(op, payload);
        self.store.insert(tx, &message).await?;
        self.notify();
        Ok(message.id)
    }

    /// [`OutboxRelay::add_message`] with a JSON-encoded payload.
    pub async fn add_json_message<T: Serialize + ?Sized>(
        &self,
        tx: &mut S::Tx,
        op: OperationType,
        payload: &T,
    ) -> OutboxResult<Uuid> {
        let bytes = serde_json::to_vec(payload)?;
        self.add_message(tx, op, bytes).await
    }

    /// Wake the push loop. Never blocks; dropped when a wake-up is already pending.
    pub fn notify(&self) {
        match self.notify_tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Closed(())) => debug!("Outbox notify channel closed"),
        }
    }

    /// Fetch the next unhandled message and dispatch it.
    ///
    /// Returns the id of the handled message, or `None` when the queue is empty.
    pub async fn process_next(&self) -> OutboxResult<Option<Uuid>> {
        match self.store.fetch_by_status(MessageStatus::Unhandled).await? {
            Some(message) => {
                self.dispatch(&message).await?;
                Ok(Some(message.id))
            }
            None => Ok(None),
        }
    }

    async fn dispatch(&self, message: &OutboxMessage) -> OutboxResult<()> {
        let mut tx = self.store.begin().await?;

        let handler = self
            .handlers
            .get(message.op)
            .ok_or(OutboxError::HandlerNotFound(message.op))?;

        handler
            .handle(message)
            .await
            .map_err(|source| OutboxError::HandlerFailed {
                id: message.id,
                source,
            })?;

        self.store
            .update_status(&mut tx, message.id, MessageStatus::Handled)
            .await?;
        self.store.commit(tx).await?;

        debug!(event_id = %message.id, op = %message.op, "Outbox message handled");
        Ok(())
    }

    /// Delete handled messages past retention, batch by batch, until a batch comes back empty.
    pub async fn purge_handled(&self) -> OutboxResult<u64> {
        let mut total = 0u64;

        loop {
            let deleted = self
                .store
                .delete_batch(
                    MessageStatus::Handled,
                    self.config.delete_batch_size,
                    self.config.retention,
                )
                .await?;

            if deleted == 0 {
                break;
            }

            total += deleted;
            if let Some(metrics) = &self.metrics {
                metrics.deleted.inc_by(deleted);
            }
            tokio::time::sleep(self.config.delete_interval).await;
        }

        info!(deleted = total, "Outbox retention run finished");
        Ok(total)
    }

    /// Push loop. Runs until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// Only one push loop may run per relay; a second caller waits for the first to stop.
    pub async fn run_push_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut notify_rx = self.notify_rx.lock().await;

        info!(
            retry_backoff_ms = self.config.retry_backoff.as_millis() as u64,
            "Outbox push loop starting"
        );

        while !*shutdown.borrow() {
            let message = match self.store.fetch_by_status(MessageStatus::Unhandled).await {
                Ok(message) => message,
                Err(e) => {
                    error!(error = %e, "Failed to fetch outbox message");
                    if self.config.fetch_error_backoff.is_zero() {
                        tokio::task::yield_now().await;
                    } else if sleep_or_shutdown(self.config.fetch_error_backoff, &mut shutdown).await
                    {
                        break;
                    }
                    continue;
                }
            };

            let Some(message) = message else {
                debug!("No outbox messages to handle");
                tokio::select! {
                    _ = notify_rx.recv() => {}
                    _ = tokio::time::sleep(self.config.retry_backoff) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                continue;
            };

            match self.dispatch(&message).await {
                Ok(()) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.dispatched.inc();
                        metrics.stalled.set(0);
                    }
                }
                Err(e) => {
                    warn!(
                        event_id = %message.id,
                        op = %message.op,
                        error = %e,
                        "Outbox dispatch failed, will retry"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.dispatch_failures.inc();
                        metrics.stalled.set(1);
                    }
                    if sleep_or_shutdown(self.config.retry_backoff, &mut shutdown).await {
                        break;
                    }
                }
            }
        }

        info!("Outbox push loop stopped");
    }

    /// Delete loop. First run is immediate, then every `delete_period`.
    pub async fn run_delete_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.delete_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            delete_period_secs = self.config.delete_period.as_secs(),
            retention_secs = self.config.retention.as_secs(),
            "Outbox delete loop starting"
        );

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    tokio::select! {
                        result = self.purge_handled() => {
                            if let Err(e) = result {
                                error!(error = %e, "Outbox retention run failed");
                            }
                        }
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Outbox delete loop stopped");
    }

    /// Spawn both loops on the current runtime.
    pub fn spawn(self: &Arc<Self>) -> RelayHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let push = {
            let relay = Arc::clone(self);
            let shutdown = shutdown_rx.clone();
            tokio::spawn(async move { relay.run_push_loop(shutdown).await })
        };
        let delete = {
            let relay = Arc::clone(self);
            tokio::spawn(async move { relay.run_delete_loop(shutdown_rx).await })
        };

        RelayHandle {
            shutdown_tx,
            tasks: vec![push, delete],
        }
    }
}

/// Returns true when shutdown was requested before the sleep finished.
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

/// Handle to the running relay loops.
pub struct RelayHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RelayHandle {
    /// Signal both loops and wait for them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);

        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Outbox relay task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use crate::memory::InMemoryEventStore;

    fn relay() -> OutboxRelay<InMemoryEventStore> {
        OutboxRelay::new(Arc::new(InMemoryEventStore::new()), RelayConfig::default())
    }

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.delete_batch_size, 100);
        assert_eq!(config.delete_interval, Duration::from_millis(500));
        assert_eq!(config.retry_backoff, Duration::from_secs(5));
        assert_eq!(config.retention, Duration::from_secs(86_400));
        assert!(config.fetch_error_backoff.is_zero());
    }

    #[tokio::test]
    async fn test_notify_never_blocks() {
        let relay = relay();
        for _ in 0..10 {
            relay.notify();
        }
    }

    #[tokio::test]
    async fn test_process_next_empty_queue() {
        let relay = relay();
        assert!(relay.process_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_handler_leaves_message_unhandled() {
        let relay = relay();
        let mut tx = relay.store().begin().await.unwrap();
        let id = relay
            .add_message(&mut tx, OperationType::UserCreatedMq, vec![])
            .await
            .unwrap();
        relay.store().commit(tx).await.unwrap();

        assert!(matches!(
            relay.process_next().await,
            Err(OutboxError::HandlerNotFound(OperationType::UserCreatedMq))
        ));
        let message = relay.store().get(id).await.unwrap();
        assert_eq!(message.status, MessageStatus::Unhandled);

        relay
            .register(
                OperationType::UserCreatedMq,
                handler_fn(|_| async { Ok(()) }),
            )
            .unwrap();
        assert_eq!(relay.process_next().await.unwrap(), Some(id));
        assert_eq!(
            relay.store().get(id).await.unwrap().status,
            MessageStatus::Handled
        );
    }

    #[tokio::test]
    async fn test_handler_error_keeps_message() {
        let relay = relay();
        relay
            .register(
                OperationType::UserCreatedEmail,
                handler_fn(|_| async { anyhow::bail!("smtp down") }),
            )
            .unwrap();

        let mut tx = relay.store().begin().await.unwrap();
        let id = relay
            .add_json_message(&mut tx, OperationType::UserCreatedEmail, &serde_json::json!({}))
            .await
            .unwrap();
        relay.store().commit(tx).await.unwrap();

        let err = relay.process_next().await.unwrap_err();
        assert!(matches!(err, OutboxError::HandlerFailed { id: failed, .. } if failed == id));
        assert_eq!(
            relay.store().count_by_status(MessageStatus::Unhandled).await,
            1
        );
    }
}
