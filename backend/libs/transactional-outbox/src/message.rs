use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{OutboxError, OutboxResult};

/// Business event kinds carried by the outbox. Stored as `SMALLINT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum OperationType {
    /// Send the welcome email for a new user
    UserCreatedEmail = 1,
    /// Publish the user-created event to the message queue
    UserCreatedMq = 2,
}

impl OperationType {
    pub fn as_i16(self) -> i16 {
        self as i16
    }
}

impl TryFrom<i16> for OperationType {
    type Error = OutboxError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(OperationType::UserCreatedEmail),
            2 => Ok(OperationType::UserCreatedMq),
            other => Err(OutboxError::InvalidRecord(format!(
                "unknown operation type {other}"
            ))),
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationType::UserCreatedEmail => "user_created_email",
            OperationType::UserCreatedMq => "user_created_mq",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum MessageStatus {
    Unhandled = 0,
    Handled = 1,
    /// Parked by an operator; the relay never sets it
    Error = 2,
}

impl MessageStatus {
    pub fn as_i16(self) -> i16 {
        self as i16
    }
}

impl TryFrom<i16> for MessageStatus {
    type Error = OutboxError;

    fn try_from(value: i16) -> Result<Self, OutboxError> {
        match value {
            0 => Ok(MessageStatus::Unhandled),
            1 => Ok(MessageStatus::Handled),
            2 => Ok(MessageStatus::Error),
            other => Err(OutboxError::InvalidRecord(format!("unknown status {other}"))),
        }
    }
}

/// A row of the outbox table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub op: OperationType,
    /// Opaque to the relay; interpreted by the handler
    pub payload: Vec<u8>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxMessage {
    pub fn new(op: OperationType, payload: Vec<u8>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            op,
            payload,
            status: MessageStatus::Unhandled,
            created_at: now,
            updated_at: now,
        }
    }

    /// Decode a JSON payload.
    pub fn payload_json<T: DeserializeOwned>(&self) -> OutboxResult<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}
