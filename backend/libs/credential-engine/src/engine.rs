//! Token signing, verification and revocation over a cached key store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, decode_header, encode, Algorithm, Header, Validation};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::claims::Claims;
use crate::error::{CredentialError, CredentialResult};
use crate::keys::{Key, KeyFamily, KeySet};
use crate::store::KeyStore;

const REQUIRED_CLAIMS: [&str; 5] = ["exp", "nbf", "iss", "aud", "sub"];

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub issuer: String,
    pub audience: String,
    /// Lifetime of issued tokens
    pub token_ttl: Duration,
    /// Clock skew tolerated on exp/nbf
    pub leeway: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            issuer: "IAMService.com".to_string(),
            audience: "IAMService".to_string(),
            token_ttl: Duration::from_secs(3600),
            leeway: Duration::from_secs(60),
        }
    }
}

/// Signs and verifies tokens with per-set keys that are generated on first use.
///
/// Key sets are cached by set id behind a single read/write lock. The cache only grows: keys are
/// never rotated out by the engine itself.
pub struct CredentialEngine {
    store: Arc<dyn KeyStore>,
    cache: RwLock<HashMap<String, KeySet>>,
    config: EngineConfig,
}

impl CredentialEngine {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: Arc<dyn KeyStore>, config: EngineConfig) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Sign a token for `user_id` with the current key of `set_id`.
    ///
    /// The first call for a set id generates and persists a key for `alg`; later calls must use
    /// the same algorithm.
    pub async fn sign(
        &self,
        user_id: &str,
        extra_claims: Option<Map<String, Value>>,
        set_id: &str,
        alg: Algorithm,
    ) -> CredentialResult<String> {
        let key = self.load_or_generate_key(set_id, alg).await?;
        if key.alg != alg {
            return Err(CredentialError::AlgorithmMismatch {
                set_id: set_id.to_string(),
                requested: alg,
                actual: key.alg,
            });
        }

        let claims = Claims::issue(&self.config, user_id, extra_claims.unwrap_or_default());

        let mut header = Header::new(key.alg);
        header.kid = Some(key.kid.clone());

        let encoding_key = key.encoding_key()?;
        let token = encode(&header, &claims, &encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode token: {e}"))?;

        debug!(set_id, kid = %key.kid, jti = %claims.jti, "Token signed");
        Ok(token)
    }

    /// Verify signature, issuer, audience, time window and revocation status.
    pub async fn verify(&self, token: &str) -> CredentialResult<Claims> {
        let kid = extract_kid(token)?;
        let key = self.resolve_key(&kid).await?;
        let decoding_key = key.decoding_key()?;

        let mut validation = Validation::new(key.alg);
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_audience(&[&self.config.audience]);
        validation.set_required_spec_claims(&REQUIRED_CLAIMS);
        validation.validate_nbf = true;
        validation.leeway = self.config.leeway.as_secs();

        let claims = decode::<Claims>(token, &decoding_key, &validation)
            .map_err(|e| {
                debug!(kid = %kid, error = %e, "Token validation failed");
                CredentialError::InvalidToken
            })?
            .claims;

        if self.store.is_revoked(&claims.jti).await? {
            debug!(jti = %claims.jti, "Token is revoked");
            return Err(CredentialError::TokenRevoked);
        }

        Ok(claims)
    }

    /// Put the token id on the revocation list.
    ///
    /// Tokens that are already invalid, expired or revoked are accepted as a no-op.
    pub async fn revoke(&self, token: &str) -> CredentialResult<()> {
        let claims = match self.verify(token).await {
            Ok(claims) => claims,
            Err(CredentialError::InvalidToken | CredentialError::TokenRevoked) => {
                debug!("Token already unusable, nothing to revoke");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        // The entry must outlive the last instant verify would still accept the token
        let leeway = chrono::Duration::from_std(self.config.leeway)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let exp = DateTime::<Utc>::from_timestamp(claims.exp, 0).unwrap_or_else(Utc::now);
        let expires_at = exp.checked_add_signed(leeway).unwrap_or(exp);
        self.store.add_revocation(&claims.jti, expires_at).await?;

        info!(jti = %claims.jti, sub = %claims.sub, "Token revoked");
        Ok(())
    }

    /// Public half of a key, with every private component removed.
    pub async fn get_public_key(&self, kid: &str) -> CredentialResult<Key> {
        self.resolve_key(kid).await?.public_key()
    }

    /// Drop revocation entries for tokens that have expired anyway, leeway included.
    pub async fn purge_expired_revocations(&self) -> CredentialResult<u64> {
        let purged = self.store.purge_revocations(Utc::now()).await?;
        if purged > 0 {
            info!(purged, "Purged expired revocation entries");
        }
        Ok(purged)
    }

    async fn load_or_generate_key(&self, set_id: &str, alg: Algorithm) -> CredentialResult<Key> {
        {
            let cache = self.cache.read().await;
            if let Some(key) = cache.get(set_id).and_then(KeySet::signing_key) {
                return Ok(key.clone());
            }
        }

        let mut cache = self.cache.write().await;
        // Another task may have populated the set while we waited for the write lock
        if let Some(key) = cache.get(set_id).and_then(KeySet::signing_key) {
            return Ok(key.clone());
        }

        let mut key_set = self.store.get_key_set(set_id).await?;
        if key_set.signing_key().is_none() {
            if !key_set.is_empty() {
                warn!(set_id, keys = key_set.keys.len(), "Key set has no valid key");
            }

            let key = generate_key(alg).await?;
            self.store
                .add_key_set(set_id, &KeySet::single(key.clone()))
                .await?;
            info!(set_id, kid = %key.kid, alg = ?alg, "Generated signing key");
            key_set.push_newest(key);
        }

        let key = key_set
            .signing_key()
            .cloned()
            .ok_or_else(|| CredentialError::KeyNotFound(set_id.to_string()))?;
        cache.insert(set_id.to_string(), key_set);

        Ok(key)
    }

    async fn resolve_key(&self, kid: &str) -> CredentialResult<Key> {
        {
            let cache = self.cache.read().await;
            if let Some(key) = cache.values().find_map(|set| set.find(kid)) {
                return Ok(key.clone());
            }
        }

        // The owning set id is unknown here, so the result stays out of the cache
        self.store
            .get_key(kid)
            .await?
            .ok_or_else(|| CredentialError::KeyNotFound(kid.to_string()))
    }
}

fn extract_kid(token: &str) -> CredentialResult<String> {
    let header =
        decode_header(token).map_err(|e| CredentialError::MalformedToken(e.to_string()))?;

    header
        .kid
        .ok_or_else(|| CredentialError::MalformedToken("missing kid".to_string()))
}

async fn generate_key(alg: Algorithm) -> CredentialResult<Key> {
    if KeyFamily::of(alg).is_symmetric() {
        return Key::generate(alg);
    }
    tokio::task::spawn_blocking(move || Key::generate(alg))
        .await
        .map_err(|e| CredentialError::KeyGeneration(format!("generator task failed: {e}")))?
}
