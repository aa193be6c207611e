/// User registration with outbox-backed side effects
use crate::db::users;
use crate::error::{IdentityError, Result};
use crate::models::{NewUser, User};
use crate::services::email::WelcomeMailPayload;
use crate::services::kafka_events::UserCreatedEvent;
use std::sync::Arc;
use tracing::info;
use transactional_outbox::{EventStore, OperationType, OutboxRelay, SqlxEventStore};

/// Creates users and queues their welcome mail and user-created event atomically.
#[derive(Clone)]
pub struct RegistrationService {
    relay: Arc<OutboxRelay<SqlxEventStore>>,
}

impl RegistrationService {
    pub fn new(relay: Arc<OutboxRelay<SqlxEventStore>>) -> Self {
        Self { relay }
    }

    /// Insert the user and both outbox messages in one transaction, then wake the relay.
    ///
    /// Nothing is queued if the insert fails; nothing is inserted if queueing fails.
    pub async fn register(&self, new_user: NewUser) -> Result<User> {
        let name = new_user.normalized_name().ok_or_else(|| {
            IdentityError::InvalidUsername(
                "name must be 1-32 letters or digits".to_string(),
            )
        })?;
        let email = validate_email(&new_user.email)?;

        let store = self.relay.store();
        if users::find_by_name(store.pool(), &name).await?.is_some() {
            return Err(IdentityError::UsernameAlreadyExists);
        }

        let mut tx = store.begin().await?;
        let user = users::insert_user(&mut tx, &name, &email, &new_user.password_hash).await?;

        self.relay
            .add_json_message(
                &mut tx,
                OperationType::UserCreatedEmail,
                &WelcomeMailPayload {
                    id: user.id,
                    to: user.email.clone(),
                },
            )
            .await?;
        self.relay
            .add_json_message(
                &mut tx,
                OperationType::UserCreatedMq,
                &UserCreatedEvent {
                    id: user.id,
                    name: user.name.clone(),
                    email: user.email.clone(),
                    created_at: user.created_at,
                },
            )
            .await?;

        store.commit(tx).await?;
        self.relay.notify();

        info!(user_id = %user.id, "User registered");
        Ok(user)
    }
}

/// Trimmed address if it parses as an RFC 5321 mailbox address.
pub fn validate_email(email: &str) -> Result<String> {
    let email = email.trim();
    email
        .parse::<lettre::Address>()
        .map_err(|e| IdentityError::InvalidEmail(e.to_string()))?;
    Ok(email.to_string())
}
