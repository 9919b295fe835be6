//! REST order book snapshot types.
//!
//! `GET /products/<product-id>/book?level=3` returns every resting order:
//!
//! ```json
//! {
//!     "sequence": 3,
//!     "bids": [["295.96", "0.05088265", "3b0f1225-7f84-490b-a29f-0faef9de823a"]],
//!     "asks": [["295.97", "5.72036512", "da863862-25f4-4868-ac41-005d11ab0a5f"]]
//! }
//! ```

use serde::{Deserialize, Serialize};

use super::{OrderId, Price, Sequence, Size};

/// One resting order in a level 3 snapshot: `[price, size, order_id]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry(pub Price, pub Size, pub OrderId);

impl SnapshotEntry {
    /// Create a snapshot entry
    pub fn new(price: Price, size: Size, order_id: impl Into<OrderId>) -> Self {
        Self(price, size, order_id.into())
    }

    /// Order price
    pub fn price(&self) -> Price {
        self.0
    }

    /// Remaining order size
    pub fn size(&self) -> Size {
        self.1
    }

    /// Order id
    pub fn order_id(&self) -> &str {
        &self.2
    }
}

/// Full point-in-time readout of a product's book
///
/// Bids are listed best (highest) first and asks best (lowest) first. Within
/// one price, orders appear in time priority.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    /// Feed sequence number the snapshot was captured at
    pub sequence: Sequence,
    /// Resting buy orders
    #[serde(default)]
    pub bids: Vec<SnapshotEntry>,
    /// Resting sell orders
    #[serde(default)]
    pub asks: Vec<SnapshotEntry>,
}

impl BookSnapshot {
    /// Create an empty snapshot at the given sequence
    pub fn new(sequence: Sequence) -> Self {
        Self {
            sequence,
            bids: Vec::new(),
            asks: Vec::new(),
        }
    }

    /// Append a bid entry
    #[must_use]
    pub fn with_bid(mut self, price: Price, size: Size, order_id: impl Into<OrderId>) -> Self {
        self.bids.push(SnapshotEntry::new(price, size, order_id));
        self
    }

    /// Append an ask entry
    #[must_use]
    pub fn with_ask(mut self, price: Price, size: Size, order_id: impl Into<OrderId>) -> Self {
        self.asks.push(SnapshotEntry::new(price, size, order_id));
        self
    }

    /// Total number of orders in the snapshot
    pub fn order_count(&self) -> usize {
        self.bids.len() + self.asks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_deserialize_level3() {
        let json = r#"{
            "sequence": 3,
            "bids": [["295.96", "0.05088265", "3b0f1225-7f84-490b-a29f-0faef9de823a"]],
            "asks": [["295.97", "5.72036512", "da863862-25f4-4868-ac41-005d11ab0a5f"]]
        }"#;

        let snapshot: BookSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.sequence, 3);
        assert_eq!(snapshot.bids[0].price(), dec!(295.96));
        assert_eq!(snapshot.bids[0].size(), dec!(0.05088265));
        assert_eq!(
            snapshot.asks[0].order_id(),
            "da863862-25f4-4868-ac41-005d11ab0a5f"
        );
        assert_eq!(snapshot.order_count(), 2);
    }

    #[test]
    fn test_builder() {
        let snapshot = BookSnapshot::new(50)
            .with_bid(dec!(100), dec!(5), "A")
            .with_ask(dec!(101), dec!(1), "B");
        assert_eq!(snapshot.bids.len(), 1);
        assert_eq!(snapshot.asks[0], SnapshotEntry::new(dec!(101), dec!(1), "B"));
    }
}
