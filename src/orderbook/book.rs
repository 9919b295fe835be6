//! Core order-level (L3) book data structure.
//!
//! This implementation uses `BTreeMap` for sorted price levels, providing:
//!
//! - O(log n) insertion, deletion, and lookup of levels
//! - O(1) access to best bid/ask (via `first_key_value`)
//! - Ordered iteration for depth-of-book queries
//!
//! An `FxHashMap` index from order id to `(side, price, arrival)` makes every
//! order mutation a hash lookup plus two tree operations.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use tracing::warn;

use super::level::{PriceLevel, RestingOrder};
use crate::error::Error;
use crate::types::{BookSnapshot, OrderId, Price, Sequence, Side, Size, SnapshotEntry};
use crate::Result;

/// Where an order lives in the book
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OrderLocation {
    side: Side,
    price: Price,
    arrival: u64,
}

/// Replica of one product's resting orders.
///
/// # Design Decisions
///
/// 1. **Decimal prices**: Prices and sizes are `rust_decimal::Decimal`, so
///    comparisons and level aggregates are exact.
///
/// 2. **BTreeMap per side**: Bids are keyed by `Reverse<Price>` so both sides
///    iterate best-first and the top of book is `first_key_value()`.
///
/// 3. **Arrival counter**: Each insert takes the next value of a book-local
///    counter, which orders the FIFO queue inside a level.
///
/// 4. **No sequencing**: The book applies whatever it is told. Sequence
///    tracking lives in [`ProductSyncState`](super::ProductSyncState).
///
/// # Invariants
///
/// - every indexed order is present in exactly one level on exactly one side
/// - no level is ever empty
/// - a level's aggregate size equals the sum of its orders' sizes
///
/// # Thread Safety
///
/// This struct is `Send + Sync` but not internally synchronized. For
/// concurrent access, wrap in `parking_lot::Mutex` or `RwLock`.
#[derive(Debug, Clone, Default)]
pub struct PriceLevelBook {
    /// Bid levels, best (highest) first
    bids: BTreeMap<Reverse<Price>, PriceLevel>,

    /// Ask levels, best (lowest) first
    asks: BTreeMap<Price, PriceLevel>,

    /// Order id -> location
    index: FxHashMap<OrderId, OrderLocation>,

    /// Next arrival counter value
    next_arrival: u64,
}

impl PriceLevelBook {
    /// Create an empty book
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new order at the tail of its price level
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateOrder`] if the id is already resting. The
    /// book is left untouched in that case.
    pub fn add_order(
        &mut self,
        side: Side,
        price: Price,
        size: Size,
        order_id: impl Into<OrderId>,
    ) -> Result<()> {
        let order_id = order_id.into();
        if self.index.contains_key(&order_id) {
            return Err(Error::DuplicateOrder(order_id));
        }

        let arrival = self.next_arrival;
        self.next_arrival += 1;

        self.index.insert(
            order_id.clone(),
            OrderLocation {
                side,
                price,
                arrival,
            },
        );

        let order = RestingOrder {
            id: order_id,
            side,
            price,
            size,
            arrival,
        };

        match side {
            Side::Buy => self
                .bids
                .entry(Reverse(price))
                .or_insert_with(|| PriceLevel::new(price))
                .push_back(order),
            Side::Sell => self
                .asks
                .entry(price)
                .or_insert_with(|| PriceLevel::new(price))
                .push_back(order),
        }

        Ok(())
    }

    /// Remove an order, dropping its level if it was the last one there
    ///
    /// Returns the removed order, or `None` if the id was not resting.
    pub fn remove_order(&mut self, order_id: &str) -> Option<RestingOrder> {
        let location = self.index.remove(order_id)?;
        self.take(location)
    }

    /// Reduce a resting order by a traded size
    ///
    /// The order is removed once nothing remains. Returns the remaining size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownOrder`] if the maker order is not resting.
    pub fn match_order(&mut self, order_id: &str, traded_size: Size) -> Result<Size> {
        let location = *self
            .index
            .get(order_id)
            .ok_or_else(|| Error::UnknownOrder(order_id.to_string()))?;

        let current = self
            .level(location.side, location.price)
            .and_then(|level| level.get(location.arrival))
            .map(|order| order.size)
            .ok_or_else(|| Error::UnknownOrder(order_id.to_string()))?;

        if traded_size > current {
            warn!(
                order_id,
                resting = %current,
                traded = %traded_size,
                "match larger than resting size, removing order"
            );
        }

        let remaining = (current - traded_size).max(Decimal::ZERO);
        if remaining.is_zero() {
            self.remove_order(order_id);
        } else if let Some(level) = self.level_mut(location.side, location.price) {
            level.resize(location.arrival, remaining);
        }

        Ok(remaining)
    }

    /// Set a resting order's remaining size
    ///
    /// Returns the previous size, or `None` (and does nothing) if the order is
    /// not resting. Resizing to zero removes the order.
    pub fn change_order(&mut self, order_id: &str, new_size: Size) -> Option<Size> {
        let location = *self.index.get(order_id)?;

        if new_size.is_zero() {
            return self.remove_order(order_id).map(|order| order.size);
        }

        self.level_mut(location.side, location.price)?
            .resize(location.arrival, new_size)
    }

    /// Replace the whole book with a snapshot
    ///
    /// Entries are inserted in the given order, so time priority within a
    /// level follows the snapshot's listing. Zero-size and repeated order ids
    /// are skipped.
    pub fn load_snapshot(&mut self, bids: &[SnapshotEntry], asks: &[SnapshotEntry]) {
        self.clear();

        let entries = bids
            .iter()
            .map(|entry| (Side::Buy, entry))
            .chain(asks.iter().map(|entry| (Side::Sell, entry)));

        for (side, entry) in entries {
            if entry.size().is_zero() {
                continue;
            }
            if let Err(e) = self.add_order(side, entry.price(), entry.size(), entry.order_id()) {
                warn!(error = %e, "skipping snapshot entry");
            }
        }
    }

    /// Get the best bid (highest buy price)
    ///
    /// Returns `(price, aggregate size)` or `None` if no bids.
    #[must_use]
    pub fn best_bid(&self) -> Option<(Price, Size)> {
        self.bids
            .first_key_value()
            .map(|(_, level)| (level.price(), level.total_size()))
    }

    /// Get the best ask (lowest sell price)
    ///
    /// Returns `(price, aggregate size)` or `None` if no asks.
    #[must_use]
    pub fn best_ask(&self) -> Option<(Price, Size)> {
        self.asks
            .first_key_value()
            .map(|(_, level)| (level.price(), level.total_size()))
    }

    /// Get the mid price
    ///
    /// Returns the average of best bid and best ask, or `None` if either is missing.
    #[must_use]
    pub fn mid_price(&self) -> Option<Price> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    /// Get the spread
    #[must_use]
    pub fn spread(&self) -> Option<Price> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => Some(ask - bid),
            _ => None,
        }
    }

    /// Check if the book is crossed (best bid >= best ask)
    ///
    /// This shouldn't happen in a healthy replica but is useful for validation.
    #[must_use]
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => bid >= ask,
            _ => false,
        }
    }

    /// Look up a resting order
    #[must_use]
    pub fn order(&self, order_id: &str) -> Option<&RestingOrder> {
        let location = self.index.get(order_id)?;
        self.level(location.side, location.price)?
            .get(location.arrival)
    }

    /// Whether an order is resting
    #[must_use]
    pub fn contains(&self, order_id: &str) -> bool {
        self.index.contains_key(order_id)
    }

    /// Look up a price level
    #[must_use]
    pub fn level(&self, side: Side, price: Price) -> Option<&PriceLevel> {
        match side {
            Side::Buy => self.bids.get(&Reverse(price)),
            Side::Sell => self.asks.get(&price),
        }
    }

    /// Bid levels, best first
    pub fn bids(&self) -> impl Iterator<Item = &PriceLevel> + '_ {
        self.bids.values()
    }

    /// Ask levels, best first
    pub fn asks(&self) -> impl Iterator<Item = &PriceLevel> + '_ {
        self.asks.values()
    }

    /// Get the top N bid levels as `(price, aggregate size)`
    #[must_use]
    pub fn top_bids(&self, n: usize) -> Vec<(Price, Size)> {
        self.bids()
            .take(n)
            .map(|level| (level.price(), level.total_size()))
            .collect()
    }

    /// Get the top N ask levels as `(price, aggregate size)`
    #[must_use]
    pub fn top_asks(&self, n: usize) -> Vec<(Price, Size)> {
        self.asks()
            .take(n)
            .map(|level| (level.price(), level.total_size()))
            .collect()
    }

    /// Get total bid size
    #[must_use]
    pub fn total_bid_size(&self) -> Size {
        self.bids.values().map(PriceLevel::total_size).sum()
    }

    /// Get total ask size
    #[must_use]
    pub fn total_ask_size(&self) -> Size {
        self.asks.values().map(PriceLevel::total_size).sum()
    }

    /// Number of resting orders
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Check if the book is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Get the number of price levels as `(bids, asks)`
    #[must_use]
    pub fn num_levels(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }

    /// Clear the book
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.index.clear();
        self.next_arrival = 0;
    }

    /// Full-depth readout in snapshot form
    ///
    /// Loading the result into an empty book reproduces this book's levels,
    /// sizes and time priority.
    #[must_use]
    pub fn to_snapshot(&self, sequence: Sequence) -> BookSnapshot {
        BookSnapshot {
            sequence,
            bids: snapshot_entries(self.bids()),
            asks: snapshot_entries(self.asks()),
        }
    }

    fn level_mut(&mut self, side: Side, price: Price) -> Option<&mut PriceLevel> {
        match side {
            Side::Buy => self.bids.get_mut(&Reverse(price)),
            Side::Sell => self.asks.get_mut(&price),
        }
    }

    /// Pull an already unindexed order out of its level
    fn take(&mut self, location: OrderLocation) -> Option<RestingOrder> {
        let level = self.level_mut(location.side, location.price)?;
        let order = level.remove(location.arrival);

        if level.is_empty() {
            match location.side {
                Side::Buy => self.bids.remove(&Reverse(location.price)),
                Side::Sell => self.asks.remove(&location.price),
            };
        }

        order
    }
}

fn snapshot_entries<'a>(levels: impl Iterator<Item = &'a PriceLevel>) -> Vec<SnapshotEntry> {
    levels
        .flat_map(PriceLevel::orders)
        .map(|order| SnapshotEntry::new(order.price, order.size, order.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn assert_consistent(book: &PriceLevelBook) {
        let mut seen = 0;
        for level in book.bids().chain(book.asks()) {
            assert!(!level.is_empty());
            let sum: Size = level.orders().map(|o| o.size).sum();
            assert_eq!(sum, level.total_size());
            for order in level.orders() {
                assert_eq!(book.order(&order.id), Some(order));
                seen += 1;
            }
        }
        assert_eq!(seen, book.len());
    }

    #[test]
    fn test_new_book() {
        let book = PriceLevelBook::new();
        assert!(book.is_empty());
        assert_eq!(book.best_bid(), None);
        assert_eq!(book.best_ask(), None);
        assert_eq!(book.num_levels(), (0, 0));
    }

    #[test]
    fn test_add_and_best_prices() {
        let mut book = PriceLevelBook::new();

        book.add_order(Side::Buy, dec!(100), dec!(5), "A").unwrap();
        book.add_order(Side::Buy, dec!(99.5), dec!(1), "B").unwrap();
        book.add_order(Side::Sell, dec!(101), dec!(2), "C").unwrap();
        book.add_order(Side::Sell, dec!(100.5), dec!(3), "D").unwrap();
        book.add_order(Side::Buy, dec!(100), dec!(0.5), "E").unwrap();

        assert_eq!(book.best_bid(), Some((dec!(100), dec!(5.5))));
        assert_eq!(book.best_ask(), Some((dec!(100.5), dec!(3))));
        assert_eq!(book.num_levels(), (2, 2));
        assert_eq!(book.len(), 5);
        assert_consistent(&book);
    }

    #[test]
    fn test_duplicate_open_is_rejected() {
        let mut book = PriceLevelBook::new();
        book.add_order(Side::Buy, dec!(100), dec!(5), "A").unwrap();

        let err = book
            .add_order(Side::Sell, dec!(200), dec!(1), "A")
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateOrder(id) if id == "A"));
        assert_eq!(book.best_ask(), None);
        assert_eq!(book.best_bid(), Some((dec!(100), dec!(5))));
    }

    #[test]
    fn test_fifo_within_level() {
        let mut book = PriceLevelBook::new();
        book.add_order(Side::Sell, dec!(10), dec!(1), "B").unwrap();
        book.add_order(Side::Sell, dec!(10), dec!(2), "C").unwrap();

        let level = book.level(Side::Sell, dec!(10)).unwrap();
        let ids: Vec<&str> = level.orders().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["B", "C"]);

        // A match names its maker explicitly; the book never infers FIFO
        book.match_order("C", dec!(1)).unwrap();
        assert_eq!(book.order("B").unwrap().size, dec!(1));
        assert_eq!(book.order("C").unwrap().size, dec!(1));
    }

    #[test]
    fn test_remove_order() {
        let mut book = PriceLevelBook::new();
        book.add_order(Side::Buy, dec!(100), dec!(5), "A").unwrap();
        book.add_order(Side::Buy, dec!(100), dec!(1), "B").unwrap();

        let removed = book.remove_order("A").unwrap();
        assert_eq!(removed.size, dec!(5));
        assert_eq!(book.best_bid(), Some((dec!(100), dec!(1))));

        book.remove_order("B");
        assert_eq!(book.best_bid(), None);
        assert_eq!(book.num_levels(), (0, 0));

        // Absent ids are a no-op
        assert_eq!(book.remove_order("A"), None);
        assert_consistent(&book);
    }

    #[test]
    fn test_match_order() {
        let mut book = PriceLevelBook::new();
        book.add_order(Side::Buy, dec!(100), dec!(5), "A").unwrap();

        assert_eq!(book.match_order("A", dec!(2)).unwrap(), dec!(3));
        assert_eq!(book.best_bid(), Some((dec!(100), dec!(3))));

        assert_eq!(book.match_order("A", dec!(3)).unwrap(), dec!(0));
        assert!(!book.contains("A"));
        assert_eq!(book.best_bid(), None);

        assert!(matches!(
            book.match_order("A", dec!(1)),
            Err(Error::UnknownOrder(_))
        ));
    }

    #[test]
    fn test_overfill_removes_order() {
        let mut book = PriceLevelBook::new();
        book.add_order(Side::Sell, dec!(50), dec!(1), "A").unwrap();
        book.add_order(Side::Sell, dec!(50), dec!(2), "B").unwrap();

        assert_eq!(book.match_order("A", dec!(1.5)).unwrap(), dec!(0));
        assert_eq!(book.best_ask(), Some((dec!(50), dec!(2))));
        assert_consistent(&book);
    }

    #[test]
    fn test_change_order() {
        let mut book = PriceLevelBook::new();
        book.add_order(Side::Sell, dec!(50), dec!(4), "A").unwrap();
        book.add_order(Side::Sell, dec!(50), dec!(1), "B").unwrap();

        assert_eq!(book.change_order("A", dec!(2)), Some(dec!(4)));
        assert_eq!(book.best_ask(), Some((dec!(50), dec!(3))));

        // Resize keeps queue position
        let front = book.level(Side::Sell, dec!(50)).unwrap().front().unwrap();
        assert_eq!(front.id, "A");

        assert_eq!(book.change_order("missing", dec!(1)), None);

        assert_eq!(book.change_order("B", dec!(0)), Some(dec!(1)));
        assert!(!book.contains("B"));
        assert_consistent(&book);
    }

    #[test]
    fn test_load_snapshot_replaces_state() {
        let mut book = PriceLevelBook::new();
        book.add_order(Side::Buy, dec!(90), dec!(1), "OLD").unwrap();

        let snapshot = BookSnapshot::new(10)
            .with_bid(dec!(100), dec!(5), "A")
            .with_bid(dec!(100), dec!(1), "B")
            .with_bid(dec!(99), dec!(0), "ZERO")
            .with_ask(dec!(101), dec!(2), "C");
        book.load_snapshot(&snapshot.bids, &snapshot.asks);

        assert!(!book.contains("OLD"));
        assert!(!book.contains("ZERO"));
        assert_eq!(book.best_bid(), Some((dec!(100), dec!(6))));
        assert_eq!(book.best_ask(), Some((dec!(101), dec!(2))));
        let level = book.level(Side::Buy, dec!(100)).unwrap();
        assert_eq!(level.front().unwrap().id, "A");
        assert_consistent(&book);
    }

    #[test]
    fn test_to_snapshot_round_trip_preserves_priority() {
        let mut book = PriceLevelBook::new();
        book.add_order(Side::Buy, dec!(100), dec!(1), "B").unwrap();
        book.add_order(Side::Buy, dec!(101), dec!(1), "A").unwrap();
        book.add_order(Side::Buy, dec!(100), dec!(2), "C").unwrap();
        book.add_order(Side::Sell, dec!(102), dec!(3), "D").unwrap();

        let snapshot = book.to_snapshot(7);
        assert_eq!(snapshot.sequence, 7);
        let bid_ids: Vec<&str> = snapshot.bids.iter().map(|e| e.order_id()).collect();
        assert_eq!(bid_ids, vec!["A", "B", "C"]);

        let mut rebuilt = PriceLevelBook::new();
        rebuilt.load_snapshot(&snapshot.bids, &snapshot.asks);
        assert_eq!(rebuilt.to_snapshot(7), snapshot);
    }

    #[test]
    fn test_mid_price_and_spread() {
        let mut book = PriceLevelBook::new();
        book.add_order(Side::Buy, dec!(45), dec!(1), "A").unwrap();
        book.add_order(Side::Sell, dec!(55), dec!(1), "B").unwrap();

        assert_eq!(book.mid_price(), Some(dec!(50)));
        assert_eq!(book.spread(), Some(dec!(10)));
        assert!(!book.is_crossed());
    }

    #[test]
    fn test_top_levels() {
        let mut book = PriceLevelBook::new();
        book.add_order(Side::Buy, dec!(45), dec!(100), "A").unwrap();
        book.add_order(Side::Buy, dec!(44), dec!(200), "B").unwrap();
        book.add_order(Side::Buy, dec!(43), dec!(300), "C").unwrap();

        let top = book.top_bids(2);
        assert_eq!(top, vec![(dec!(45), dec!(100)), (dec!(44), dec!(200))]);
        assert_eq!(book.total_bid_size(), dec!(600));
        assert_eq!(book.total_ask_size(), dec!(0));
    }

    #[test]
    fn test_crossed_book() {
        let mut book = PriceLevelBook::new();
        book.add_order(Side::Buy, dec!(55), dec!(1), "A").unwrap();
        book.add_order(Side::Sell, dec!(50), dec!(1), "B").unwrap();

        assert!(book.is_crossed());
    }

    #[test]
    fn test_clear() {
        let mut book = PriceLevelBook::new();
        book.add_order(Side::Buy, dec!(50), dec!(1), "A").unwrap();
        book.add_order(Side::Sell, dec!(55), dec!(1), "B").unwrap();
        assert!(!book.is_empty());

        book.clear();

        assert!(book.is_empty());
        assert!(!book.contains("A"));
        book.add_order(Side::Buy, dec!(50), dec!(1), "A").unwrap();
    }
}
