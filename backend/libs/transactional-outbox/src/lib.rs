//! # Transactional Outbox Relay
//!
//! Business transactions write an outbox message next to their own rows; a background relay
//! delivers each message to the handler registered for its operation type and marks it handled.
//!
//! This guarantees **at-least-once delivery**: a message is never lost once the business
//! transaction commits, even if
//! - the service crashes between commit and delivery
//! - a handler (SMTP, Kafka, ...) is temporarily unavailable
//! - marking the message as handled fails after the side effect happened
//!
//! The last case means handlers can see duplicates.
//!
//! ## Usage Example
//!
//! ### 1. Insert data and message in the same transaction
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use transactional_outbox::{EventStore, OperationType, OutboxRelay, SqlxEventStore};
//! use uuid::Uuid;
//!
//! async fn create_user(
//!     relay: &OutboxRelay<SqlxEventStore>,
//!     email: &str,
//! ) -> Result<(), Box<dyn std::error::Error>> {
//!     let mut tx = relay.store().begin().await?;
//!
//!     let user_id = Uuid::new_v4();
//!     sqlx::query("INSERT INTO users (id, email) VALUES ($1, $2)")
//!         .bind(user_id)
//!         .bind(email)
//!         .execute(&mut *tx)
//!         .await?;
//!
//!     relay
//!         .add_json_message(
//!             &mut tx,
//!             OperationType::UserCreatedMq,
//!             &serde_json::json!({ "id": user_id, "to": email }),
//!         )
//!         .await?;
//!
//!     relay.store().commit(tx).await?;
//!     relay.notify();
//!     Ok(())
//! }
//! ```
//!
//! ### 2. Register handlers and start the loops
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use transactional_outbox::{
//!     handler_fn, OperationType, OutboxRelay, RelayConfig, SqlxEventStore,
//! };
//! use sqlx::PgPool;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = PgPool::connect("postgresql://localhost/mydb").await?;
//!     let relay = Arc::new(OutboxRelay::new(
//!         Arc::new(SqlxEventStore::new(pool)),
//!         RelayConfig::default(),
//!     ));
//!
//!     relay.register(
//!         OperationType::UserCreatedMq,
//!         handler_fn(|message| async move {
//!             println!("delivering {}", message.id);
//!             Ok(())
//!         }),
//!     )?;
//!
//!     let handle = relay.spawn();
//!     tokio::signal::ctrl_c().await?;
//!     handle.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Delivery order
//!
//! One message is dispatched at a time, most recently created first. A message whose handler
//! keeps failing (or has no handler) is retried every `retry_backoff` and holds back everything
//! behind it; `outbox-cli park` moves it out of the way.

pub mod error;
pub mod handler;
pub mod memory;
pub mod message;
pub mod metrics;
pub mod postgres;
pub mod relay;
pub mod store;

pub use error::{OutboxError, OutboxResult};
pub use handler::{handler_fn, FnHandler, HandlerRegistry, MessageHandler};
pub use memory::{InMemoryEventStore, MemoryTx};
pub use message::{MessageStatus, OperationType, OutboxMessage};
pub use metrics::OutboxMetrics;
pub use postgres::SqlxEventStore;
pub use relay::{OutboxRelay, RelayConfig, RelayHandle};
pub use store::EventStore;
