//! # gdax-book
//!
//! A self-healing, order-level (L3) order book replica for the
//! [GDAX](https://www.gdax.com) exchange.
//!
//! ## Features
//!
//! - **Order-level books** - every resting order, grouped by price with time
//!   priority, exact decimal arithmetic
//! - **Sequenced synchronization** - diffs buffered until a REST snapshot
//!   lands, replayed in order, gaps detected and healed automatically
//! - **REST and WebSocket clients** - snapshots, products, ticker and the
//!   `full` feed channel with reconnection
//! - **Async/Await** - built on Tokio
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gdax_book::{Config, GdaxClient};
//! use gdax_book::orderbook::SyncEvent;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), gdax_book::Error> {
//!     let client = GdaxClient::new(Config::new())?;
//!     let sync = client.book_sync();
//!     let mut events = sync.subscribe();
//!
//!     let mut feed = client.connect_feed().await?;
//!     feed.subscribe(&["BTC-USD"]).await?;
//!     tokio::spawn({
//!         let sync = sync.clone();
//!         async move { sync.run(feed.into_diffs()).await }
//!     });
//!
//!     while let Ok(event) = events.recv().await {
//!         if let SyncEvent::Applied { .. } = event {
//!             println!("BTC-USD best bid: {:?}", sync.best_bid("BTC-USD"));
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! This crate is organized into several modules:
//!
//! - [`client`] - REST and WebSocket clients for API communication
//! - [`types`] - Wire types for snapshots and feed messages
//! - [`orderbook`] - Book replica, per-product sync state and the coordinator
//! - [`config`] - Endpoints, credentials and retry policy
//! - [`error`] - Error types for the crate
//!
//! ## Performance
//!
//! - `BTreeMap` for sorted price levels, best price in O(log n)
//! - `FxHashMap` order index for O(1) order lookup
//! - `parking_lot` mutexes (faster than std)
//! - one lock per product, so products sync independently

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod orderbook;
pub mod types;

// Re-export main types at crate root for convenience
pub use config::Config;
pub use error::Error;
pub use orderbook::{PriceLevelBook, ProductSyncState, SyncCoordinator};

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// The main GDAX client
///
/// Bundles the configuration with a REST client and hands out feed
/// connections and sync coordinators built from them.
///
/// # Example
///
/// ```rust,no_run
/// use gdax_book::{Config, GdaxClient};
///
/// # async fn example() -> gdax_book::Result<()> {
/// let client = GdaxClient::new(Config::new())?;
///
/// // Market data
/// let products = client.rest().get_products().await?;
/// let ticker = client.rest().get_product_ticker("BTC-USD").await?;
/// println!("{} products, BTC-USD last {}", products.len(), ticker.price);
///
/// // Book replication
/// let sync = client.book_sync();
/// sync.track("BTC-USD");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct GdaxClient {
    config: Config,
    rest_client: client::rest::RestClient,
}

impl GdaxClient {
    /// Create a new GDAX client with the given configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the REST URL is invalid, the API secret cannot be
    /// decoded, or the HTTP client cannot be initialized.
    pub fn new(config: Config) -> Result<Self> {
        let rest_client = client::rest::RestClient::new(&config)?;
        Ok(Self {
            config,
            rest_client,
        })
    }

    /// Get a reference to the REST client
    pub fn rest(&self) -> &client::rest::RestClient {
        &self.rest_client
    }

    /// Get a reference to the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Connect to the WebSocket feed
    pub async fn connect_feed(&self) -> Result<client::websocket::FeedClient> {
        client::websocket::FeedClient::connect(&self.config).await
    }

    /// Connect to the WebSocket feed with automatic reconnection
    pub async fn connect_reconnecting_feed(&self) -> Result<client::websocket::ReconnectingFeed> {
        client::websocket::ReconnectingFeed::connect(self.config.clone()).await
    }

    /// Create a sync coordinator that fetches snapshots over REST
    pub fn book_sync(&self) -> SyncCoordinator<client::rest::RestClient> {
        SyncCoordinator::new(self.rest_client.clone(), &self.config)
    }
}
