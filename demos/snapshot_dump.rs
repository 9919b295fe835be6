//! Snapshot dump - fetch a level 3 book over REST and summarize it
//!
//! Usage:
//!   cargo run --example snapshot_dump -- BTC-USD
//!
//! Optional:
//!   GDAX_ENV=sandbox  # Use the public sandbox (default: production)
//!   GDAX_API_KEY / GDAX_API_SECRET / GDAX_API_PASSPHRASE  # Sign requests

use gdax_book::config::{Credentials, Environment};
use gdax_book::orderbook::PriceLevelBook;
use gdax_book::{Config, GdaxClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let product = std::env::args().nth(1).unwrap_or_else(|| "BTC-USD".to_string());

    let env = match std::env::var("GDAX_ENV").unwrap_or_default().as_str() {
        "sandbox" => Environment::Sandbox,
        _ => Environment::Production,
    };

    let mut config = Config::new().with_environment(env);
    if let (Ok(key), Ok(secret), Ok(passphrase)) = (
        std::env::var("GDAX_API_KEY"),
        std::env::var("GDAX_API_SECRET"),
        std::env::var("GDAX_API_PASSPHRASE"),
    ) {
        config = config.with_credentials(Credentials::new(key, secret, passphrase));
    }

    let client = GdaxClient::new(config)?;
    let time = client.rest().get_time().await?;
    println!("Exchange time: {}", time.iso);

    let ticker = client.rest().get_product_ticker(&product).await?;
    println!("{} last trade: {} x {}", product, ticker.price, ticker.size);

    let snapshot = client.rest().get_product_order_book(&product, 3).await?;
    println!(
        "Snapshot at sequence {}: {} bids, {} asks",
        snapshot.sequence,
        snapshot.bids.len(),
        snapshot.asks.len()
    );

    let mut book = PriceLevelBook::new();
    book.load_snapshot(&snapshot.bids, &snapshot.asks);

    let (bid_levels, ask_levels) = book.num_levels();
    println!("Levels: {} bid, {} ask", bid_levels, ask_levels);
    println!("Best bid: {:?}", book.best_bid());
    println!("Best ask: {:?}", book.best_ask());
    println!("Spread:   {:?}", book.spread());
    println!(
        "Depth:    {} bid / {} ask",
        book.total_bid_size(),
        book.total_ask_size()
    );

    println!("\nTop of book:");
    for level in book.asks().take(5).collect::<Vec<_>>().into_iter().rev() {
        println!("  ask {:>12} x {:<14} ({} orders)", level.price(), level.total_size(), level.len());
    }
    for level in book.bids().take(5) {
        println!("  bid {:>12} x {:<14} ({} orders)", level.price(), level.total_size(), level.len());
    }

    Ok(())
}
