use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CredentialResult;
use crate::keys::{Key, KeySet};

/// Persistence for key sets and the revocation list.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Persist every key of `key_set` under `set_id`.
    async fn add_key_set(&self, set_id: &str, key_set: &KeySet) -> CredentialResult<()>;

    /// Keys of `set_id`, newest first. An unknown set id yields an empty set.
    async fn get_key_set(&self, set_id: &str) -> CredentialResult<KeySet>;

    async fn get_key(&self, kid: &str) -> CredentialResult<Option<Key>>;

    /// Add a token id to the revocation list. Re-adding an id is not an error.
    async fn add_revocation(&self, jti: &str, expires_at: DateTime<Utc>) -> CredentialResult<()>;

    async fn is_revoked(&self, jti: &str) -> CredentialResult<bool>;

    /// Drop entries whose token expired before `before`. Returns the number removed.
    async fn purge_revocations(&self, before: DateTime<Utc>) -> CredentialResult<u64>;
}
