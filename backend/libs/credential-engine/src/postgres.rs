//! PostgreSQL key store.
//!
//! Expects the `jwt_keys` and `jwt_revocations` tables created by the service migrations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::debug;

use crate::error::CredentialResult;
use crate::keys::{Key, KeySet, KeyStatus};
use crate::store::KeyStore;

#[derive(Clone)]
pub struct SqlxKeyStore {
    pool: PgPool,
}

impl SqlxKeyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn status_label(status: KeyStatus) -> &'static str {
    match status {
        KeyStatus::Valid => "valid",
        KeyStatus::Expired => "expired",
    }
}

#[async_trait]
impl KeyStore for SqlxKeyStore {
    async fn add_key_set(&self, set_id: &str, key_set: &KeySet) -> CredentialResult<()> {
        let mut tx = self.pool.begin().await?;

        for key in &key_set.keys {
            sqlx::query(
                r#"
                INSERT INTO jwt_keys (kid, set_id, data, status, created_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(&key.kid)
            .bind(set_id)
            .bind(Json(key))
            .bind(status_label(key.status))
            .bind(key.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(set_id, keys = key_set.keys.len(), "Key set persisted");
        Ok(())
    }

    async fn get_key_set(&self, set_id: &str) -> CredentialResult<KeySet> {
        let rows = sqlx::query_scalar::<_, Json<Key>>(
            r#"
            SELECT data FROM jwt_keys
            WHERE set_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(set_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(KeySet::new(rows.into_iter().map(|Json(key)| key).collect()))
    }

    async fn get_key(&self, kid: &str) -> CredentialResult<Option<Key>> {
        let row = sqlx::query_scalar::<_, Json<Key>>("SELECT data FROM jwt_keys WHERE kid = $1")
            .bind(kid)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|Json(key)| key))
    }

    async fn add_revocation(&self, jti: &str, expires_at: DateTime<Utc>) -> CredentialResult<()> {
        sqlx::query(
            r#"
            INSERT INTO jwt_revocations (jti, expires_at, revoked_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (jti) DO NOTHING
            "#,
        )
        .bind(jti)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn is_revoked(&self, jti: &str) -> CredentialResult<bool> {
        let revoked = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM jwt_revocations WHERE jti = $1)",
        )
        .bind(jti)
        .fetch_one(&self.pool)
        .await?;

        Ok(revoked)
    }

    async fn purge_revocations(&self, before: DateTime<Utc>) -> CredentialResult<u64> {
        let result = sqlx::query("DELETE FROM jwt_revocations WHERE expires_at < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
