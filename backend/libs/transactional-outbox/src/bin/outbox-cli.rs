use std::env;

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use transactional_outbox::{OutboxStore, PgOutboxStore};

fn usage() -> ! {
    eprintln!("Usage:");
    eprintln!("  outbox-cli requeue-errors <rfc3339_ts> <DATABASE_URL>");
    eprintln!("  outbox-cli requeue-range <from_id> <to_id> <DATABASE_URL>");
    eprintln!("  outbox-cli purge-done <older_than_days> <DATABASE_URL>");
    eprintln!("  outbox-cli stats <DATABASE_URL>");
    std::process::exit(1);
}

async fn connect(db_url: &str) -> Result<PgOutboxStore, sqlx::Error> {
    let pool = PgPool::connect(db_url).await?;
    Ok(PgOutboxStore::new(pool))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        usage();
    }

    match args[1].as_str() {
        "requeue-errors" if args.len() == 4 => {
            let ts: DateTime<Utc> = DateTime::parse_from_rfc3339(&args[2])?.with_timezone(&Utc);
            let store = connect(&args[3]).await?;
            let count = store.requeue_errors(ts).await?;
            println!("Re-queued {} failed envelopes created since {}", count, ts);
        }
        "requeue-range" if args.len() == 5 => {
            let from: i64 = args[2].parse()?;
            let to: i64 = args[3].parse()?;
            if from > to {
                eprintln!("from_id must not be greater than to_id");
                std::process::exit(1);
            }
            let store = connect(&args[4]).await?;
            let count = store.requeue_range(from, to).await?;
            println!("Re-queued {} failed envelopes with ids {}..={}", count, from, to);
        }
        "purge-done" if args.len() == 4 => {
            let days: i64 = args[2].parse()?;
            let store = connect(&args[3]).await?;
            let count = store.purge_done(Duration::days(days)).await?;
            println!("Purged {} delivered envelopes older than {} days", count, days);
        }
        "stats" if args.len() == 3 => {
            let store = connect(&args[2]).await?;
            let stats = store.pending_stats().await?;
            println!(
                "pending={} oldest_pending_age_seconds={}",
                stats.pending, stats.oldest_age_seconds
            );
        }
        _ => usage(),
    }

    Ok(())
}
