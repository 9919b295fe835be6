//! Product and market data types.
//!
//! These cover the public REST endpoints a book consumer typically needs
//! alongside the replica: the product catalogue, the current ticker and the
//! exchange clock.

use serde::{Deserialize, Serialize};

use super::{Price, Size};

/// A tradable product (e.g. `BTC-USD`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Product identifier
    pub id: String,

    /// Base currency (e.g. `BTC`)
    pub base_currency: String,

    /// Quote currency (e.g. `USD`)
    pub quote_currency: String,

    /// Minimum order size in base currency
    #[serde(default)]
    pub base_min_size: Option<Size>,

    /// Maximum order size in base currency
    #[serde(default)]
    pub base_max_size: Option<Size>,

    /// Price increment
    #[serde(default)]
    pub quote_increment: Option<Price>,

    /// Human readable name
    #[serde(default)]
    pub display_name: Option<String>,

    /// Trading status (`online`, `offline`, ...)
    #[serde(default)]
    pub status: Option<String>,
}

/// Snapshot of the last trade, best bid/ask and 24h volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    /// Id of the last trade
    pub trade_id: serde_json::Value,

    /// Last trade price
    pub price: Price,

    /// Last trade size
    pub size: Size,

    /// Best bid
    #[serde(default)]
    pub bid: Option<Price>,

    /// Best ask
    #[serde(default)]
    pub ask: Option<Price>,

    /// 24h volume
    #[serde(default)]
    pub volume: Option<Size>,

    /// Time of the last trade (ISO 8601)
    #[serde(default)]
    pub time: Option<String>,
}

/// Exchange server time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerTime {
    /// ISO 8601 timestamp
    pub iso: String,
    /// Seconds since the Unix epoch
    pub epoch: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_product_deserialization() {
        let json = r#"{
            "id": "BTC-USD",
            "base_currency": "BTC",
            "quote_currency": "USD",
            "base_min_size": "0.01",
            "base_max_size": "10000.00",
            "quote_increment": "0.01"
        }"#;

        let product: Product = serde_json::from_str(json).unwrap();
        assert_eq!(product.id, "BTC-USD");
        assert_eq!(product.base_min_size, Some(dec!(0.01)));
        assert_eq!(product.quote_increment, Some(dec!(0.01)));
        assert_eq!(product.status, None);
    }

    #[test]
    fn test_ticker_deserialization() {
        let json = r#"{"trade_id": "test-id", "price": "9.00", "size": "5"}"#;

        let ticker: Ticker = serde_json::from_str(json).unwrap();
        assert_eq!(ticker.trade_id, serde_json::json!("test-id"));
        assert_eq!(ticker.price, dec!(9.00));
        assert_eq!(ticker.size, dec!(5));
        assert_eq!(ticker.bid, None);
    }
}
