// Integration tests for user registration and outbox delivery
//
// Input validation tests run without a database. The Postgres-backed tests need a database
// and are skipped when DATABASE_URL is not set:
//   DATABASE_URL=postgres://localhost/identity_test cargo test --test registration_tests

use async_trait::async_trait;
use identity_service::models::NewUser;
use identity_service::services::{
    EventPublisher, MailSender, RegistrationService, UserEventsHandler, WelcomeMailHandler,
};
use identity_service::IdentityError;
use serial_test::serial;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::Mutex;
use transactional_outbox::{OperationType, OutboxRelay, RelayConfig, SqlxEventStore};
use uuid::Uuid;

#[derive(Default)]
struct RecordingMailer {
    recipients: Mutex<Vec<String>>,
}

#[async_trait]
impl MailSender for RecordingMailer {
    async fn send_html_email(
        &self,
        recipient: &str,
        _subject: &str,
        _html_body: &str,
        _text_body: &str,
    ) -> identity_service::Result<()> {
        self.recipients.lock().await.push(recipient.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingPublisher {
    keys: Mutex<Vec<String>>,
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(
        &self,
        _topic: &str,
        key: &str,
        _payload: &[u8],
    ) -> identity_service::Result<()> {
        self.keys.lock().await.push(key.to_string());
        Ok(())
    }
}

fn new_user(name: &str, email: &str) -> NewUser {
    NewUser {
        name: name.to_string(),
        email: email.to_string(),
        password_hash: "$argon2id$v=19$placeholder".to_string(),
    }
}

fn unique_name() -> String {
    format!("user{}", &Uuid::new_v4().simple().to_string()[..12])
}

fn relay_for(pool: PgPool) -> Arc<OutboxRelay<SqlxEventStore>> {
    Arc::new(OutboxRelay::new(
        Arc::new(SqlxEventStore::new(pool)),
        RelayConfig::default(),
    ))
}

async fn test_pool() -> Option<PgPool> {
    let url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("DATABASE_URL not set, skipping Postgres-backed test");
            return None;
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("connect to test database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");
    Some(pool)
}

/// Unhandled outbox messages whose JSON payload refers to `user_id`.
async fn unhandled_ops_for(pool: &PgPool, user_id: Uuid) -> Vec<i16> {
    let rows: Vec<(i16, Vec<u8>)> =
        sqlx::query_as("SELECT op, payload FROM outbox_messages WHERE status = 0")
            .fetch_all(pool)
            .await
            .expect("query outbox");

    let mut ops: Vec<i16> = rows
        .into_iter()
        .filter(|(_, payload)| {
            serde_json::from_slice::<serde_json::Value>(payload)
                .ok()
                .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(str::to_owned))
                .is_some_and(|id| id == user_id.to_string())
        })
        .map(|(op, _)| op)
        .collect();
    ops.sort_unstable();
    ops
}

// ============================================================================
// Input validation (no database)
// ============================================================================

#[tokio::test]
async fn test_invalid_input_rejected_before_database() {
    let pool = PgPoolOptions::new()
        .connect_lazy("postgres://localhost:1/unused")
        .expect("lazy pool");
    let service = RegistrationService::new(relay_for(pool));

    for name in ["", "   ", "has space", "semi;colon", &"x".repeat(33)] {
        let err = service
            .register(new_user(name, "ada@example.com"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, IdentityError::InvalidUsername(_)),
            "name {name:?} gave {err:?}"
        );
    }

    let err = service
        .register(new_user("ada", "not-an-email"))
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::InvalidEmail(_)));
    assert!(err.is_client_error());
}

// ============================================================================
// Postgres-backed registration
// ============================================================================

#[tokio::test]
#[serial]
async fn test_register_writes_user_and_both_messages() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let service = RegistrationService::new(relay_for(pool.clone()));
    let name = unique_name();

    let user = service
        .register(new_user(&format!("  {name} "), " ada@example.com"))
        .await
        .unwrap();

    assert_eq!(user.name, name);
    assert_eq!(user.email, "ada@example.com");
    assert_eq!(
        unhandled_ops_for(&pool, user.id).await,
        vec![
            OperationType::UserCreatedEmail.as_i16(),
            OperationType::UserCreatedMq.as_i16()
        ]
    );
}

#[tokio::test]
#[serial]
async fn test_duplicate_name_queues_nothing() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let service = RegistrationService::new(relay_for(pool.clone()));
    let name = unique_name();

    let first = service
        .register(new_user(&name, "first@example.com"))
        .await
        .unwrap();
    let err = service
        .register(new_user(&name, "second@example.com"))
        .await
        .unwrap_err();

    assert!(matches!(err, IdentityError::UsernameAlreadyExists));
    assert_eq!(unhandled_ops_for(&pool, first.id).await.len(), 2);

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE name = $1")
        .bind(&name)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
#[serial]
async fn test_registration_side_effects_delivered_by_relay() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let relay = relay_for(pool.clone());
    let mailer = Arc::new(RecordingMailer::default());
    let publisher = Arc::new(RecordingPublisher::default());
    relay
        .register(
            OperationType::UserCreatedEmail,
            WelcomeMailHandler::new(mailer.clone()),
        )
        .unwrap();
    relay
        .register(
            OperationType::UserCreatedMq,
            UserEventsHandler::new(publisher.clone(), "identity.user.created"),
        )
        .unwrap();

    let service = RegistrationService::new(relay.clone());
    let user = service
        .register(new_user(&unique_name(), "welcome@example.com"))
        .await
        .unwrap();

    // Drain everything pending, including leftovers from earlier tests
    for _ in 0..1000 {
        if relay.process_next().await.unwrap().is_none() {
            break;
        }
    }

    assert!(unhandled_ops_for(&pool, user.id).await.is_empty());
    assert!(mailer
        .recipients
        .lock()
        .await
        .contains(&"welcome@example.com".to_string()));
    assert!(publisher.keys.lock().await.contains(&user.id.to_string()));
}
