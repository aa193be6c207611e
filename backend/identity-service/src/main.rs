/// Identity Service Main Entry Point
///
/// Starts:
/// - PostgreSQL connection pool and migrations
/// - Credential engine over the Postgres key store
/// - Outbox relay with the welcome mail and user event handlers
/// - Revocation purge task (optional)
use anyhow::{Context, Result};
use credential_engine::{CredentialEngine, SqlxKeyStore};
use identity_service::{
    config::Settings,
    services::{
        EmailService, EventPublisher, KafkaEventProducer, LogOnlyPublisher, TokenService,
        UserEventsHandler, WelcomeMailHandler,
    },
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use transactional_outbox::{OperationType, OutboxMetrics, OutboxRelay, SqlxEventStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| {
            "identity_service=info,transactional_outbox=info,credential_engine=info,info".into()
        }))
        .with_target(false)
        .json()
        .init();

    info!("Starting Identity Service");

    let settings = Settings::load().context("Failed to load configuration")?;
    info!("Configuration loaded successfully");

    // Initialize database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(settings.database.max_connections)
        .acquire_timeout(Duration::from_secs(settings.database.acquire_timeout))
        .connect(&settings.database.url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    info!(
        "Database pool initialized with {} max connections",
        settings.database.max_connections
    );

    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .context("Failed to run database migrations")?;
    info!("Database migrations completed");

    // Credential engine
    let engine = Arc::new(CredentialEngine::with_config(
        Arc::new(SqlxKeyStore::new(db_pool.clone())),
        settings.jwt.engine_config(),
    ));
    let tokens = TokenService::new(engine.clone(), &settings.jwt);
    info!(
        access_alg = ?settings.jwt.access_token_algorithm,
        id_alg = ?settings.jwt.id_token_algorithm,
        "Credential engine initialized"
    );

    // Outbox relay
    let store = Arc::new(SqlxEventStore::new(db_pool.clone()));
    let relay_config = settings.outbox.relay_config();
    let relay = if settings.outbox.metrics_enabled {
        let metrics =
            OutboxMetrics::new("identity-service").context("Failed to create outbox metrics")?;
        OutboxRelay::new_with_metrics(store, relay_config, metrics)
    } else {
        OutboxRelay::new(store, relay_config)
    };
    let relay = Arc::new(relay);

    let email_service =
        EmailService::new(&settings.email).context("Failed to initialize email service")?;
    if email_service.is_enabled() {
        info!("Email service initialized with SMTP");
    } else {
        info!("Email service running in no-op mode (SMTP not configured)");
    }

    let publisher: Arc<dyn EventPublisher> = if settings.kafka.brokers.is_empty() {
        info!("Kafka brokers not configured; user events will only be logged");
        Arc::new(LogOnlyPublisher)
    } else {
        let brokers = settings.kafka.brokers.join(",");
        let producer = KafkaEventProducer::new(
            &brokers,
            Duration::from_secs(settings.kafka.producer_timeout),
        )
        .context("Failed to initialize Kafka producer")?;
        info!("Kafka producer initialized");
        Arc::new(producer)
    };

    relay.register(
        OperationType::UserCreatedEmail,
        WelcomeMailHandler::new(Arc::new(email_service)),
    )?;
    relay.register(
        OperationType::UserCreatedMq,
        UserEventsHandler::new(publisher, settings.kafka.user_events_topic.clone()),
    )?;

    let relay_handle = relay.spawn();
    info!("Outbox relay started");

    let (purge_shutdown_tx, purge_shutdown_rx) = watch::channel(false);
    let purge_task = if settings.jwt.revocation_purge_enabled {
        Some(spawn_revocation_purge(
            engine.clone(),
            Duration::from_secs(settings.jwt.revocation_purge_interval_seconds),
            purge_shutdown_rx,
        ))
    } else {
        info!("Revocation purge disabled; revoked token ids are kept");
        None
    };

    // Exercise the signing path once so both key sets exist before traffic arrives
    if let Err(err) = warm_up_key_sets(&tokens).await {
        warn!(error = %err, "Key set warm-up failed; keys will be created on first use");
    }

    shutdown_signal().await;

    let _ = purge_shutdown_tx.send(true);
    if let Some(task) = purge_task {
        if let Err(err) = task.await {
            error!("Revocation purge task failed: {}", err);
        }
    }
    relay_handle.shutdown().await;

    db_pool.close().await;
    info!("Identity service shutdown complete");

    Ok(())
}

async fn warm_up_key_sets(tokens: &TokenService) -> identity_service::Result<()> {
    let probe = identity_service::models::User {
        id: uuid::Uuid::nil(),
        name: "warmup".to_string(),
        email: "warmup@localhost".to_string(),
        password_hash: String::new(),
        created_at: chrono::Utc::now(),
        last_login_at: None,
    };
    tokens.issue_access_token(&probe).await?;
    tokens.issue_id_token(&probe).await?;
    Ok(())
}

fn spawn_revocation_purge(
    engine: Arc<CredentialEngine>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = engine.purge_expired_revocations().await {
                        warn!(error = %err, "Revocation purge failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("Revocation purge task stopped");
    })
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }

    info!("Shutting down gracefully...");
}
