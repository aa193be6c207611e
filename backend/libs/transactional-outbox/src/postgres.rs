//! PostgreSQL event store over the `outbox_messages` table.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{OutboxError, OutboxResult};
use crate::message::{MessageStatus, OperationType, OutboxMessage};
use crate::store::EventStore;

/// SQLx-based event store using PostgreSQL.
#[derive(Clone)]
pub struct SqlxEventStore {
    pool: PgPool,
}

impl SqlxEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Reset handled messages created since `ts` so the relay delivers them again.
    pub async fn replay_since(&self, ts: DateTime<Utc>) -> OutboxResult<u64> {
        let res = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = $1,
                updated_at = NOW()
            WHERE status = $2 AND created_at >= $3
            "#,
        )
        .bind(MessageStatus::Unhandled.as_i16())
        .bind(MessageStatus::Handled.as_i16())
        .bind(ts)
        .execute(&self.pool)
        .await
        .context("Failed to replay messages since timestamp")?;

        Ok(res.rows_affected())
    }

    /// Move an unhandled message to `Error` so it no longer blocks the queue head.
    pub async fn park(&self, id: Uuid) -> OutboxResult<()> {
        let res = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = $1,
                updated_at = NOW()
            WHERE id = $2 AND status = $3
            "#,
        )
        .bind(MessageStatus::Error.as_i16())
        .bind(id)
        .bind(MessageStatus::Unhandled.as_i16())
        .execute(&self.pool)
        .await
        .context("Failed to park message")?;

        if res.rows_affected() == 0 {
            warn!(event_id = %id, "No unhandled message to park");
            return Err(OutboxError::EventNotFound(id));
        }

        Ok(())
    }

    fn map_row(row: PgRow) -> OutboxResult<OutboxMessage> {
        Ok(OutboxMessage {
            id: row.try_get("id")?,
            op: OperationType::try_from(row.try_get::<i16, _>("op")?)?,
            payload: row.try_get("payload")?,
            status: MessageStatus::try_from(row.try_get::<i16, _>("status")?)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl EventStore for SqlxEventStore {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> OutboxResult<Self::Tx> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, tx: Self::Tx) -> OutboxResult<()> {
        tx.commit().await?;
        Ok(())
    }

    async fn insert(&self, tx: &mut Self::Tx, message: &OutboxMessage) -> OutboxResult<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox_messages (id, op, payload, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(message.id)
        .bind(message.op.as_i16())
        .bind(&message.payload)
        .bind(message.status.as_i16())
        .bind(message.created_at)
        .bind(message.updated_at)
        .execute(&mut **tx)
        .await
        .context("Failed to insert message into outbox")?;

        debug!(event_id = %message.id, op = %message.op, "Message inserted into outbox");
        Ok(())
    }

    async fn fetch_by_status(&self, status: MessageStatus) -> OutboxResult<Option<OutboxMessage>> {
        let row = sqlx::query(
            r#"
            SELECT id, op, payload, status, created_at, updated_at
            FROM outbox_messages
            WHERE status = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(status.as_i16())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::map_row).transpose()
    }

    async fn update_status(
        &self,
        tx: &mut Self::Tx,
        id: Uuid,
        status: MessageStatus,
    ) -> OutboxResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_i16())
        .execute(&mut **tx)
        .await
        .context("Failed to update message status")?;

        if result.rows_affected() == 0 {
            warn!(event_id = %id, "Message not found when updating status");
            return Err(OutboxError::EventNotFound(id));
        }

        Ok(())
    }

    async fn delete_batch(
        &self,
        status: MessageStatus,
        batch_size: i64,
        older_than: Duration,
    ) -> OutboxResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM outbox_messages
            WHERE ctid IN (
                SELECT ctid FROM outbox_messages
                WHERE status = $1
                  AND updated_at < NOW() - make_interval(secs => $2)
                LIMIT $3
            )
            "#,
        )
        .bind(status.as_i16())
        .bind(older_than.as_secs_f64())
        .bind(batch_size)
        .execute(&self.pool)
        .await
        .context("Failed to delete outbox batch")?;

        Ok(result.rows_affected())
    }
}
