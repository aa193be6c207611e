//! Error types for the credential engine.

use jsonwebtoken::Algorithm;
use thiserror::Error;

/// Result type alias for credential operations.
pub type CredentialResult<T> = Result<T, CredentialError>;

/// Errors that can occur while signing, verifying or revoking credentials.
#[derive(Error, Debug)]
pub enum CredentialError {
    /// Token header could not be decoded or carries no key id
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// No key with this id exists in the cache or the key store
    #[error("Signing key not found: {0}")]
    KeyNotFound(String),

    /// Signature, issuer, audience or time window check failed
    #[error("Invalid token")]
    InvalidToken,

    /// Token id is on the revocation list
    #[error("Token revoked")]
    TokenRevoked,

    /// The key set already holds a key for a different algorithm
    #[error("Key set {set_id} signs with {actual:?}, not {requested:?}")]
    AlgorithmMismatch {
        set_id: String,
        requested: Algorithm,
        actual: Algorithm,
    },

    /// Symmetric keys have no public projection
    #[error("Key {0} has no public projection")]
    NoPublicKey(String),

    /// Key material generation or encoding failed
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("Credential error: {0}")]
    Other(#[from] anyhow::Error),
}

impl CredentialError {
    /// True for every failure a caller must report as "unauthorized".
    ///
    /// The variants are kept apart for logging only; upstream layers map all of them to the
    /// same response so a client cannot learn which check failed.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            CredentialError::MalformedToken(_)
                | CredentialError::KeyNotFound(_)
                | CredentialError::InvalidToken
                | CredentialError::TokenRevoked
        )
    }
}
