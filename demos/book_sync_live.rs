//! Live book sync - keeps order-level replicas in sync with the feed
//!
//! Usage:
//!   cargo run --example book_sync_live
//!
//! Optional:
//!   GDAX_ENV=sandbox            # Use the public sandbox (default: production)
//!   GDAX_PRODUCTS=BTC-USD,ETH-USD  # Products to replicate (default: BTC-USD)
//!   RUST_LOG=gdax_book=debug    # More detail from the sync engine

use std::time::Duration;

use gdax_book::config::{Environment, RetryPolicy};
use gdax_book::orderbook::SyncEvent;
use gdax_book::{Config, GdaxClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for debug output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gdax_book=info".parse()?),
        )
        .init();

    let env = match std::env::var("GDAX_ENV")
        .unwrap_or_default()
        .to_lowercase()
        .as_str()
    {
        "sandbox" => Environment::Sandbox,
        _ => Environment::Production,
    };

    let products: Vec<String> = std::env::var("GDAX_PRODUCTS")
        .unwrap_or_else(|_| "BTC-USD".to_string())
        .split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();

    println!("=== GDAX Book Sync ===\n");
    println!("Products: {}", products.join(", "));

    let config = Config::new()
        .with_environment(env)
        .with_retry_policy(RetryPolicy::new().initial_delay_ms(500).max_retries(20));
    let client = GdaxClient::new(config)?;
    let sync = client.book_sync();
    let mut events = sync.subscribe();

    // Track up front so snapshots are requested before the first diff
    for product in &products {
        sync.track(product);
    }

    let mut feed = client.connect_reconnecting_feed().await?;
    let ids: Vec<&str> = products.iter().map(String::as_str).collect();
    feed.subscribe(&ids).await?;

    let runner = tokio::spawn({
        let sync = sync.clone();
        async move { sync.run(feed.into_diffs()).await }
    });

    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SyncEvent::Synced { product_id, snapshot_sequence, replayed, discarded }) => {
                    println!(
                        "[{}] synced at {} (replayed {}, discarded {})",
                        product_id, snapshot_sequence, replayed, discarded
                    );
                }
                Ok(SyncEvent::ResyncRequested { product_id, reason }) => {
                    println!("[{}] resync requested: {:?}", product_id, reason);
                }
                Ok(SyncEvent::SnapshotFailed { product_id, reason, attempt, will_retry }) => {
                    println!(
                        "[{}] snapshot attempt {} failed: {} (retry: {})",
                        product_id, attempt, reason, will_retry
                    );
                }
                Ok(SyncEvent::Rejected { product_id, sequence, reason }) => {
                    println!("[{}] #{} rejected: {}", product_id, sequence, reason);
                }
                Ok(SyncEvent::Applied { .. }) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    println!("(skipped {} events)", n);
                }
                Err(_) => break,
            },
            _ = ticker.tick() => {
                for product in &products {
                    if !sync.is_synced(product) {
                        println!("[{}] {:?}, {} pending", product, sync.mode(product), sync.pending_len(product).unwrap_or(0));
                        continue;
                    }
                    let (bids, asks) = sync.depth(product, 3).unwrap_or_default();
                    println!(
                        "[{}] seq {:?} spread {:?} mid {:?}",
                        product,
                        sync.sequence(product),
                        sync.spread(product),
                        sync.mid_price(product)
                    );
                    for (price, size) in asks.iter().rev() {
                        println!("    ask {:>12} x {}", price, size);
                    }
                    for (price, size) in &bids {
                        println!("    bid {:>12} x {}", price, size);
                    }
                }
            }
            _ = &mut ctrl_c => {
                println!("\nShutting down");
                break;
            }
        }
    }

    runner.abort();
    Ok(())
}
