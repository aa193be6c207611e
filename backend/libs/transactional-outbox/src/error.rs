//! Error types for the transactional outbox library.

use thiserror::Error;
use uuid::Uuid;

use crate::message::OperationType;

/// Result type alias for outbox operations.
pub type OutboxResult<T> = Result<T, OutboxError>;

/// Errors that can occur during outbox operations.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Database operation failed
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// A handler is already registered for this operation type
    #[error("Handler already registered for operation {0}")]
    DuplicateHandler(OperationType),

    /// No handler registered for the message's operation type
    #[error("No handler registered for operation {0}")]
    HandlerNotFound(OperationType),

    /// Handler returned an error; the message stays unhandled
    #[error("Handler failed for message {id}: {source}")]
    HandlerFailed {
        id: Uuid,
        #[source]
        source: anyhow::Error,
    },

    /// Message not found in outbox
    #[error("Message not found: {0}")]
    EventNotFound(Uuid),

    /// Stored row cannot be mapped back to a message
    #[error("Invalid outbox record: {0}")]
    InvalidRecord(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error with context
    #[error("Outbox error: {0}")]
    Other(#[from] anyhow::Error),
}
