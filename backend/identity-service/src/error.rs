use credential_engine::CredentialError;
use thiserror::Error;
use transactional_outbox::OutboxError;

pub type Result<T> = std::result::Result<T, IdentityError>;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Username already exists")]
    UsernameAlreadyExists,

    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    #[error("Invalid email: {0}")]
    InvalidEmail(String),

    /// Any token check failure; the reason is only logged
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Key {0} has no public projection")]
    NoPublicKey(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Outbox error: {0}")]
    Outbox(String),

    #[error("Email delivery error: {0}")]
    Email(String),

    #[error("Event publish error: {0}")]
    Publish(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IdentityError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, IdentityError::Unauthorized)
    }

    /// Errors caused by caller input rather than by the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            IdentityError::UsernameAlreadyExists
                | IdentityError::InvalidUsername(_)
                | IdentityError::InvalidEmail(_)
                | IdentityError::Unauthorized
                | IdentityError::NoPublicKey(_)
        )
    }
}

// Conversions from external error types
impl From<CredentialError> for IdentityError {
    fn from(err: CredentialError) -> Self {
        if err.is_unauthorized() {
            tracing::debug!(reason = %err, "Credential rejected");
            return IdentityError::Unauthorized;
        }

        match err {
            CredentialError::NoPublicKey(kid) => IdentityError::NoPublicKey(kid),
            CredentialError::Database(e) => e.into(),
            other => {
                tracing::error!("Credential engine error: {}", other);
                IdentityError::Internal(other.to_string())
            }
        }
    }
}

impl From<OutboxError> for IdentityError {
    fn from(err: OutboxError) -> Self {
        match err {
            OutboxError::DatabaseError(e) => e.into(),
            other => {
                tracing::error!("Outbox error: {}", other);
                IdentityError::Outbox(other.to_string())
            }
        }
    }
}

impl From<sqlx::Error> for IdentityError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {}", err);
        IdentityError::Database(err.to_string())
    }
}

impl From<anyhow::Error> for IdentityError {
    fn from(err: anyhow::Error) -> Self {
        IdentityError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_failures_collapse_to_unauthorized() {
        for err in [
            CredentialError::InvalidToken,
            CredentialError::TokenRevoked,
            CredentialError::MalformedToken("bad header".into()),
            CredentialError::KeyNotFound("kid".into()),
        ] {
            let mapped = IdentityError::from(err);
            assert!(mapped.is_unauthorized());
            assert_eq!(mapped.to_string(), "Unauthorized");
        }
    }

    #[test]
    fn test_internal_credential_errors_stay_internal() {
        let mapped = IdentityError::from(CredentialError::KeyGeneration("rng".into()));
        assert!(matches!(mapped, IdentityError::Internal(_)));
        assert!(!mapped.is_client_error());

        let mapped = IdentityError::from(CredentialError::NoPublicKey("kid-1".into()));
        assert!(matches!(mapped, IdentityError::NoPublicKey(ref kid) if kid == "kid-1"));
        assert!(mapped.is_client_error());
    }

    #[test]
    fn test_outbox_database_error_maps_to_database() {
        let mapped = IdentityError::from(OutboxError::DatabaseError(sqlx::Error::RowNotFound));
        assert!(matches!(mapped, IdentityError::Database(_)));
    }
}
