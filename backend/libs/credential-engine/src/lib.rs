//! Credential engine
//!
//! Issues and validates signed JWTs for the identity service:
//! - Per-domain key sets (`access_token`, `id_token`, ...) generated lazily on first sign
//! - HMAC, RSA, RSA-PSS, ECDSA and Ed25519 keys, stored in JWK shape
//! - Token revocation by `jti`
//! - Public key lookup for JWKS publishing
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use credential_engine::{CredentialEngine, InMemoryKeyStore};
//! use jsonwebtoken::Algorithm;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let engine = CredentialEngine::new(Arc::new(InMemoryKeyStore::new()));
//!
//! let token = engine.sign("user-123", None, "access_token", Algorithm::ES256).await?;
//! let claims = engine.verify(&token).await?;
//! assert_eq!(claims.sub, "user-123");
//!
//! engine.revoke(&token).await?;
//! assert!(engine.verify(&token).await.is_err());
//! # Ok(())
//! # }
//! ```

pub mod claims;
pub mod engine;
pub mod error;
pub mod keys;
pub mod memory;
pub mod postgres;
pub mod store;

pub use claims::Claims;
pub use engine::{CredentialEngine, EngineConfig};
pub use error::{CredentialError, CredentialResult};
pub use keys::{Key, KeyFamily, KeyMaterial, KeySet, KeyStatus};
pub use memory::InMemoryKeyStore;
pub use postgres::SqlxKeyStore;
pub use store::KeyStore;

// Callers pick algorithms without a direct jsonwebtoken dependency
pub use jsonwebtoken::Algorithm;
