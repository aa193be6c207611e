//! Process-local key store for tests and database-less runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::CredentialResult;
use crate::keys::{Key, KeySet};
use crate::store::KeyStore;

#[derive(Debug, Default)]
pub struct InMemoryKeyStore {
    key_sets: RwLock<HashMap<String, Vec<Key>>>,
    revocations: RwLock<HashMap<String, DateTime<Utc>>>,
    add_key_set_calls: AtomicUsize,
    get_key_set_calls: AtomicUsize,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `add_key_set` calls so far, i.e. how many keys were generated and persisted.
    pub fn add_key_set_calls(&self) -> usize {
        self.add_key_set_calls.load(Ordering::SeqCst)
    }

    pub fn get_key_set_calls(&self) -> usize {
        self.get_key_set_calls.load(Ordering::SeqCst)
    }

    pub async fn revocation_count(&self) -> usize {
        self.revocations.read().await.len()
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn add_key_set(&self, set_id: &str, key_set: &KeySet) -> CredentialResult<()> {
        self.add_key_set_calls.fetch_add(1, Ordering::SeqCst);

        let mut sets = self.key_sets.write().await;
        let keys = sets.entry(set_id.to_string()).or_default();
        keys.extend(key_set.keys.iter().cloned());
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(())
    }

    async fn get_key_set(&self, set_id: &str) -> CredentialResult<KeySet> {
        self.get_key_set_calls.fetch_add(1, Ordering::SeqCst);

        let sets = self.key_sets.read().await;
        Ok(KeySet::new(sets.get(set_id).cloned().unwrap_or_default()))
    }

    async fn get_key(&self, kid: &str) -> CredentialResult<Option<Key>> {
        let sets = self.key_sets.read().await;
        Ok(sets.values().flatten().find(|key| key.kid == kid).cloned())
    }

    async fn add_revocation(&self, jti: &str, expires_at: DateTime<Utc>) -> CredentialResult<()> {
        self.revocations
            .write()
            .await
            .entry(jti.to_string())
            .or_insert(expires_at);
        Ok(())
    }

    async fn is_revoked(&self, jti: &str) -> CredentialResult<bool> {
        Ok(self.revocations.read().await.contains_key(jti))
    }

    async fn purge_revocations(&self, before: DateTime<Utc>) -> CredentialResult<u64> {
        let mut revocations = self.revocations.write().await;
        let len_before = revocations.len();
        revocations.retain(|_, expires_at| *expires_at >= before);
        Ok((len_before - revocations.len()) as u64)
    }
}
