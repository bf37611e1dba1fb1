//! Normalized trade tick

use serde::{Deserialize, Serialize};

/// A single market trade tick.
///
/// The serialized form is a flat mapping with all five keys always present;
/// missing optional fields serialize as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Unix epoch timestamp of the trade, in seconds.
    pub timestamp: f64,
    /// Trade price.
    pub price: f64,
    /// Exchange name (e.g. "coinbase", "binance", "kraken").
    pub source: String,
    /// Trade quantity. Not all exchanges provide this.
    pub size: Option<f64>,
    /// Trade side, e.g. "buy" or "sell".
    pub side: Option<String>,
}

impl Tick {
    pub fn new(timestamp: f64, price: f64, source: impl Into<String>) -> Self {
        Self {
            timestamp,
            price,
            source: source.into(),
            size: None,
            side: None,
        }
    }

    pub fn with_size(mut self, size: f64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_side(mut self, side: impl Into<String>) -> Self {
        self.side = Some(side.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_all_five_keys() {
        let tick = Tick::new(1700000000.5, 68500.25, "binance");
        let value = serde_json::to_value(&tick).unwrap();
        let map = value.as_object().unwrap();
        assert_eq!(map.len(), 5);
        assert!(map["size"].is_null());
        assert!(map["side"].is_null());
        assert_eq!(map["source"], "binance");
        assert_eq!(map["price"], 68500.25);
    }

    #[test]
    fn roundtrips_through_json() {
        let tick = Tick::new(1700000000.123, 68500.25, "bitfinex")
            .with_size(0.002)
            .with_side("sell");
        let json = serde_json::to_string(&tick).unwrap();
        let back: Tick = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tick);
    }

    #[test]
    fn equality_is_structural() {
        let a = Tick::new(1.0, 2.0, "gemini").with_size(3.0);
        let b = Tick::new(1.0, 2.0, "gemini").with_size(3.0);
        assert_eq!(a, b);
        assert_ne!(a, b.clone().with_side("buy"));
    }
}
