use std::env;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use transactional_outbox::{OutboxRelay, RelayConfig, SqlxEventStore};
use uuid::Uuid;

fn usage() -> ! {
    eprintln!("Usage:");
    eprintln!("  outbox-cli replay-since <rfc3339_ts> <DATABASE_URL>");
    eprintln!("  outbox-cli park <message_uuid> <DATABASE_URL>");
    eprintln!("  outbox-cli purge <DATABASE_URL>");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_target(false).init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        usage();
    }

    match args[1].as_str() {
        "replay-since" if args.len() == 4 => {
            let ts: DateTime<Utc> = DateTime::parse_from_rfc3339(&args[2])?.with_timezone(&Utc);
            let store = SqlxEventStore::new(PgPool::connect(&args[3]).await?);
            let count = store.replay_since(ts).await?;
            println!("Replayed {} messages since {}", count, ts);
        }
        "park" if args.len() == 4 => {
            let id = Uuid::parse_str(&args[2])?;
            let store = SqlxEventStore::new(PgPool::connect(&args[3]).await?);
            store.park(id).await?;
            println!("Parked message {}", id);
        }
        "purge" if args.len() == 3 => {
            let store = SqlxEventStore::new(PgPool::connect(&args[2]).await?);
            let relay = OutboxRelay::new(Arc::new(store), RelayConfig::default());
            let count = relay.purge_handled().await?;
            println!("Deleted {} handled messages", count);
        }
        _ => usage(),
    }

    Ok(())
}
