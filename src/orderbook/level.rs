//! Price level and resting order representation.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use crate::types::{OrderId, Price, Side, Size};

/// An order resting on the book
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestingOrder {
    /// Exchange order id
    pub id: OrderId,
    /// Side of the book the order rests on
    pub side: Side,
    /// Limit price
    pub price: Price,
    /// Remaining size
    pub size: Size,
    /// Book-local arrival counter; lower means earlier in the queue
    pub arrival: u64,
}

/// All orders resting at one exact price, in time priority.
///
/// Orders are keyed by their arrival counter so that removing an order from
/// the middle of the queue is O(log k) instead of a linear scan. The
/// aggregate size is maintained incrementally on every mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceLevel {
    price: Price,
    orders: BTreeMap<u64, RestingOrder>,
    total_size: Size,
}

impl PriceLevel {
    pub(crate) fn new(price: Price) -> Self {
        Self {
            price,
            orders: BTreeMap::new(),
            total_size: Decimal::ZERO,
        }
    }

    /// Price of the level
    pub fn price(&self) -> Price {
        self.price
    }

    /// Sum of the remaining sizes of all orders at this level
    pub fn total_size(&self) -> Size {
        self.total_size
    }

    /// Number of orders at this level
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    /// Whether the level has no orders
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Orders in time priority (first in queue first)
    pub fn orders(&self) -> impl Iterator<Item = &RestingOrder> + '_ {
        self.orders.values()
    }

    /// Order at the head of the queue
    pub fn front(&self) -> Option<&RestingOrder> {
        self.orders.values().next()
    }

    pub(crate) fn push_back(&mut self, order: RestingOrder) {
        self.total_size += order.size;
        self.orders.insert(order.arrival, order);
    }

    pub(crate) fn remove(&mut self, arrival: u64) -> Option<RestingOrder> {
        let order = self.orders.remove(&arrival)?;
        self.total_size -= order.size;
        Some(order)
    }

    /// Set an order's remaining size, returning the previous size
    pub(crate) fn resize(&mut self, arrival: u64, new_size: Size) -> Option<Size> {
        let order = self.orders.get_mut(&arrival)?;
        let old_size = order.size;
        order.size = new_size;
        self.total_size = self.total_size - old_size + new_size;
        Some(old_size)
    }

    pub(crate) fn get(&self, arrival: u64) -> Option<&RestingOrder> {
        self.orders.get(&arrival)
    }
}
