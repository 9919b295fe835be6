//! WebSocket feed message types.
//!
//! This module contains the commands sent to the GDAX feed and the records
//! received from it. Order book diffs are kept as loosely typed [`RawDiff`]
//! records so that a record with a missing field can still be positioned by
//! its sequence number; [`RawDiff::decode`] validates it into a [`BookEvent`].

use serde::{Deserialize, Serialize};

use super::order::Side;
use super::{OrderId, Price, Sequence, Size};
use crate::error::Error;
use crate::Result;

/// Channel carrying every order book change
pub const FULL_CHANNEL: &str = "full";

/// Channel carrying one heartbeat per product per second
pub const HEARTBEAT_CHANNEL: &str = "heartbeat";

/// Feed message types that carry a product sequence but never touch the book
const NON_BOOK_TYPES: &[&str] = &["ticker", "last_match", "snapshot", "l2update", "status"];

/// Command sent to the feed
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedCommand {
    /// Subscribe to channels for the given products
    Subscribe {
        /// Products to subscribe to
        product_ids: Vec<String>,
        /// Channels to subscribe to
        channels: Vec<String>,
    },
    /// Unsubscribe from channels
    Unsubscribe {
        /// Products to unsubscribe from
        product_ids: Vec<String>,
        /// Channels to unsubscribe from
        channels: Vec<String>,
    },
}

impl FeedCommand {
    /// Subscribe to the full and heartbeat channels
    pub fn subscribe_full(product_ids: &[String]) -> Self {
        FeedCommand::Subscribe {
            product_ids: product_ids.to_vec(),
            channels: vec![FULL_CHANNEL.to_string(), HEARTBEAT_CHANNEL.to_string()],
        }
    }
}

/// A decoded feed record that changes (or positions) a product's book
///
/// Field presence depends on `kind`:
///
/// | kind       | fields                                                  |
/// |------------|---------------------------------------------------------|
/// | `open`     | `order_id`, `side`, `price`, `remaining_size`           |
/// | `done`     | `order_id`, optional `price`/`remaining_size`/`reason`  |
/// | `match`    | `maker_order_id`, `taker_order_id`, `price`, `size`     |
/// | `change`   | `order_id`, `new_size`, optional `old_size`/`price`     |
/// | `received` | no book effect                                          |
/// | `activate` | no book effect                                          |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDiff {
    /// Event type (`open`, `done`, `match`, `change`, ...)
    #[serde(rename = "type")]
    pub kind: String,

    /// Product the event belongs to
    pub product_id: String,

    /// Per-product sequence number
    pub sequence: Sequence,

    /// Order the event refers to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,

    /// Side of the order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,

    /// Order or trade price
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Price>,

    /// Trade size for `match`, order size otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Size>,

    /// Size left on the book
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_size: Option<Size>,

    /// New size after a `change`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_size: Option<Size>,

    /// Resting order hit by a `match`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maker_order_id: Option<OrderId>,

    /// Incoming order of a `match`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taker_order_id: Option<OrderId>,

    /// Why an order is `done` (`filled`, `canceled`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Exchange timestamp (ISO 8601)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,

    /// Why the payload fields could not be read, for records kept only for
    /// their position
    #[serde(skip)]
    unreadable: Option<String>,
}

/// A validated order book change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookEvent {
    /// A new order rests on the book
    Open {
        /// Order id
        order_id: OrderId,
        /// Side
        side: Side,
        /// Limit price
        price: Price,
        /// Size resting on the book
        size: Size,
    },
    /// An order left the book
    Done {
        /// Order id
        order_id: OrderId,
    },
    /// A trade reduced a resting (maker) order
    Match {
        /// Resting order that was hit
        maker_order_id: OrderId,
        /// Traded size
        size: Size,
    },
    /// A resting order was resized
    Change {
        /// Order id
        order_id: OrderId,
        /// New remaining size
        new_size: Size,
    },
    /// Sequenced event with no effect on the book
    Noop,
}

impl BookEvent {
    /// Event kind as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            BookEvent::Open { .. } => "open",
            BookEvent::Done { .. } => "done",
            BookEvent::Match { .. } => "match",
            BookEvent::Change { .. } => "change",
            BookEvent::Noop => "noop",
        }
    }
}

impl RawDiff {
    /// Create a record with only the positional fields set
    pub fn new(kind: impl Into<String>, product_id: impl Into<String>, sequence: Sequence) -> Self {
        Self {
            kind: kind.into(),
            product_id: product_id.into(),
            sequence,
            order_id: None,
            side: None,
            price: None,
            size: None,
            remaining_size: None,
            new_size: None,
            maker_order_id: None,
            taker_order_id: None,
            reason: None,
            time: None,
            unreadable: None,
        }
    }

    /// Keep the position of a record whose payload failed to deserialize
    ///
    /// `decode` reports such a record as malformed, so it still consumes its
    /// sequence number. Fails with the original error if the record has no
    /// usable `product_id` and `sequence`.
    fn positional(value: &serde_json::Value, error: serde_json::Error) -> Result<Self> {
        let product_id = value.get("product_id").and_then(|v| v.as_str());
        let sequence = value.get("sequence").and_then(|v| v.as_u64());
        let kind = value
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        match (product_id, sequence) {
            (Some(product_id), Some(sequence)) => Ok(Self {
                unreadable: Some(error.to_string()),
                ..Self::new(kind, product_id, sequence)
            }),
            _ => Err(Error::Json(error)),
        }
    }

    /// Whether the payload failed to deserialize and only the position is known
    pub fn is_unreadable(&self) -> bool {
        self.unreadable.is_some()
    }

    /// An `open` record
    pub fn open(
        product_id: impl Into<String>,
        sequence: Sequence,
        order_id: impl Into<OrderId>,
        side: Side,
        price: Price,
        size: Size,
    ) -> Self {
        Self {
            order_id: Some(order_id.into()),
            side: Some(side),
            price: Some(price),
            remaining_size: Some(size),
            ..Self::new("open", product_id, sequence)
        }
    }

    /// A `done` record
    pub fn done(product_id: impl Into<String>, sequence: Sequence, order_id: impl Into<OrderId>) -> Self {
        Self {
            order_id: Some(order_id.into()),
            ..Self::new("done", product_id, sequence)
        }
    }

    /// A `match` record against a resting maker order
    pub fn matched(
        product_id: impl Into<String>,
        sequence: Sequence,
        maker_order_id: impl Into<OrderId>,
        size: Size,
    ) -> Self {
        Self {
            maker_order_id: Some(maker_order_id.into()),
            size: Some(size),
            ..Self::new("match", product_id, sequence)
        }
    }

    /// A `change` record
    pub fn change(
        product_id: impl Into<String>,
        sequence: Sequence,
        order_id: impl Into<OrderId>,
        new_size: Size,
    ) -> Self {
        Self {
            order_id: Some(order_id.into()),
            new_size: Some(new_size),
            ..Self::new("change", product_id, sequence)
        }
    }

    /// Validate the record into a typed book event
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedEvent`] when the type is unknown, a field
    /// required by the type is missing or negative, or the payload could not
    /// be read at all.
    pub fn decode(&self) -> Result<BookEvent> {
        if let Some(reason) = &self.unreadable {
            return Err(Error::malformed(
                self.sequence,
                format!("unreadable `{}` event: {}", self.kind, reason),
            ));
        }

        match self.kind.as_str() {
            "open" => Ok(BookEvent::Open {
                order_id: self.required(self.order_id.clone(), "order_id")?,
                side: self.required(self.side, "side")?,
                price: self.required(self.price, "price")?,
                size: self.size_field(self.remaining_size.or(self.size), "remaining_size")?,
            }),
            "done" => Ok(BookEvent::Done {
                order_id: self.required(self.order_id.clone(), "order_id")?,
            }),
            "match" => Ok(BookEvent::Match {
                maker_order_id: self.required(
                    self.maker_order_id.clone().or_else(|| self.order_id.clone()),
                    "maker_order_id",
                )?,
                size: self.size_field(self.size, "size")?,
            }),
            "change" => Ok(BookEvent::Change {
                order_id: self.required(self.order_id.clone(), "order_id")?,
                new_size: self.size_field(self.new_size.or(self.size), "new_size")?,
            }),
            "received" | "activate" => Ok(BookEvent::Noop),
            other => Err(Error::malformed(
                self.sequence,
                format!("unknown event type `{}`", other),
            )),
        }
    }

    fn required<T>(&self, value: Option<T>, field: &str) -> Result<T> {
        value.ok_or_else(|| {
            Error::malformed(
                self.sequence,
                format!("`{}` event missing `{}`", self.kind, field),
            )
        })
    }

    fn size_field(&self, value: Option<Size>, field: &str) -> Result<Size> {
        let size = self.required(value, field)?;
        if size.is_sign_negative() {
            return Err(Error::malformed(
                self.sequence,
                format!("`{}` event has negative `{}`", self.kind, field),
            ));
        }
        Ok(size)
    }
}

/// Channel membership reported after a subscribe
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelInfo {
    /// Channel name
    pub name: String,
    /// Products on the channel
    #[serde(default)]
    pub product_ids: Vec<String>,
}

/// Subscription confirmed message
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionsMsg {
    /// Active channels
    pub channels: Vec<ChannelInfo>,
}

/// Heartbeat message
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatMsg {
    /// Product
    pub product_id: String,
    /// Latest sequence for the product
    pub sequence: Sequence,
    /// Latest trade id
    #[serde(default)]
    pub last_trade_id: Option<u64>,
    /// Timestamp
    #[serde(default)]
    pub time: Option<String>,
}

/// Error reported by the feed
#[derive(Debug, Clone, Deserialize)]
pub struct FeedErrorMsg {
    /// Error message
    pub message: String,
    /// Extra detail
    #[serde(default)]
    pub reason: Option<String>,
}

/// Message received from the feed
#[derive(Debug, Clone)]
pub enum FeedMessage {
    /// Subscription confirmed
    Subscriptions(SubscriptionsMsg),
    /// Heartbeat
    Heartbeat(HeartbeatMsg),
    /// Error response
    Error(FeedErrorMsg),
    /// Order book diff
    Diff(RawDiff),
    /// Message type the book does not consume
    Other(String),
}

impl FeedMessage {
    /// Decode a text frame
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the frame is not valid JSON or does not
    /// match the shape implied by its `type`. A diff record with a readable
    /// `product_id` and `sequence` but bad payload fields is still returned as
    /// a [`FeedMessage::Diff`] that decodes as malformed.
    pub fn parse(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let message = match kind.as_str() {
            "subscriptions" => FeedMessage::Subscriptions(serde_json::from_value(value)?),
            "heartbeat" => FeedMessage::Heartbeat(serde_json::from_value(value)?),
            "error" => FeedMessage::Error(serde_json::from_value(value)?),
            k if NON_BOOK_TYPES.contains(&k) => FeedMessage::Other(kind),
            _ if value.get("product_id").is_some() && value.get("sequence").is_some() => {
                match RawDiff::deserialize(&value) {
                    Ok(diff) => FeedMessage::Diff(diff),
                    Err(e) => FeedMessage::Diff(RawDiff::positional(&value, e)?),
                }
            }
            _ => FeedMessage::Other(kind),
        };

        Ok(message)
    }
}
