//! Wire types for GDAX requests, responses and feed messages.
//!
//! - [`order`] - Order side
//! - [`messages`] - WebSocket feed records and commands
//! - [`book`] - REST order book snapshots
//! - [`market`] - Products, tickers and server time

pub mod book;
pub mod market;
pub mod messages;
pub mod order;

pub use book::{BookSnapshot, SnapshotEntry};
pub use market::{Product, ServerTime, Ticker};
pub use messages::{BookEvent, FeedMessage, RawDiff};
pub use order::Side;

/// Price of a resting order
///
/// GDAX quotes prices as decimal strings. Using `Decimal` instead of floating
/// point keeps every comparison and aggregation exact over millions of
/// incremental updates.
pub type Price = rust_decimal::Decimal;

/// Remaining size of an order, or an aggregated level size
pub type Size = rust_decimal::Decimal;

/// Exchange-assigned order identifier (a UUID string on GDAX)
pub type OrderId = String;

/// Per-product feed sequence number
pub type Sequence = u64;
