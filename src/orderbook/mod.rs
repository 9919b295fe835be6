//! Order-level book replication.
//!
//! This module provides:
//!
//! - [`PriceLevelBook`] - one product's resting orders, grouped by price with
//!   time priority inside each level
//! - [`ProductSyncState`] - sequencing state machine that buffers, replays and
//!   detects gaps for one product
//! - [`SyncCoordinator`] - routes diffs across products and drives snapshot
//!   fetches
//!
//! # Example
//!
//! ```rust
//! use gdax_book::orderbook::{DiffOutcome, ProductSyncState};
//! use gdax_book::types::{BookSnapshot, RawDiff};
//! use rust_decimal::Decimal;
//!
//! let mut state = ProductSyncState::new("BTC-USD");
//! let epoch = state.begin_loading().unwrap();
//!
//! // Diffs arriving before the snapshot are buffered
//! let diff = RawDiff::matched("BTC-USD", 51, "A", Decimal::from(2));
//! assert!(matches!(state.on_diff(diff), DiffOutcome::Buffered));
//!
//! let snapshot = BookSnapshot::new(50).with_bid(Decimal::from(100), Decimal::from(5), "A");
//! state.complete_snapshot(epoch, snapshot);
//!
//! assert_eq!(state.sequence(), Some(51));
//! if let Some((price, size)) = state.book().best_bid() {
//!     println!("Best bid: {} @ {}", size, price);
//! }
//! ```

pub mod book;
pub mod coordinator;
pub mod level;
pub mod sync;

pub use book::PriceLevelBook;
pub use coordinator::{ResyncReason, SnapshotSource, SyncCoordinator, SyncEvent};
pub use level::{PriceLevel, RestingOrder};
pub use sync::{BookEffect, DiffOutcome, ProductSyncState, SnapshotLoad, SyncMode};
