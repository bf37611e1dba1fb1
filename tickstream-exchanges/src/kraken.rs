//! Kraken v2 BTC/USD trade stream.

use serde_json::{json, Value};

use tickstream_core::{unix_now, Tick};

use crate::feed::{iso_to_unix, num, Venue};

pub struct Kraken;

impl Venue for Kraken {
    const SOURCE: &'static str = "kraken";
    const FEED_NAME: &'static str = "kraken-btc-usd";
    const WS_URL: &'static str = "wss://ws.kraken.com/v2";

    type State = ();

    fn subscribe() -> Option<String> {
        Some(
            json!({
                "method": "subscribe",
                "params": {
                    "channel": "trade",
                    "symbol": ["BTC/USD"],
                },
            })
            .to_string(),
        )
    }

    fn parse(_state: &mut (), text: &str) -> Vec<Tick> {
        let Ok(raw) = serde_json::from_str::<Value>(text) else {
            return Vec::new();
        };
        if raw.get("channel").and_then(Value::as_str) != Some("trade") {
            return Vec::new();
        }
        let Some(trades) = raw.get("data").and_then(Value::as_array) else {
            return Vec::new();
        };

        trades
            .iter()
            .filter_map(|trade| {
                let price = trade.get("price").and_then(num)?;
                let timestamp = trade
                    .get("timestamp")
                    .and_then(Value::as_str)
                    .and_then(iso_to_unix)
                    .unwrap_or_else(unix_now);
                let mut tick = Tick::new(timestamp, price, Self::SOURCE);
                if let Some(size) = trade.get("qty").and_then(num) {
                    tick = tick.with_size(size);
                }
                if let Some(side) = trade.get("side").and_then(Value::as_str) {
                    tick = tick.with_side(side);
                }
                Some(tick)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TRADE: &str = r#"{
        "channel": "trade",
        "type": "update",
        "data": [
            {
                "symbol": "BTC/USD",
                "side": "buy",
                "price": "68500.25",
                "qty": "0.001",
                "ord_type": "market",
                "trade_id": 123456,
                "timestamp": "2023-11-14T22:13:20.123Z"
            }
        ]
    }"#;

    #[test]
    fn parses_trade_update() {
        let ticks = Kraken::parse(&mut (), SAMPLE_TRADE);
        assert_eq!(ticks.len(), 1);
        let tick = &ticks[0];
        assert_eq!(tick.price, 68500.25);
        assert_eq!(tick.source, "kraken");
        assert!((tick.timestamp - 1700000000.123).abs() < 1.0);
        assert_eq!(tick.size, Some(0.001));
        assert_eq!(tick.side.as_deref(), Some("buy"));
    }

    #[test]
    fn ignores_heartbeats() {
        assert!(Kraken::parse(&mut (), r#"{"channel": "heartbeat"}"#).is_empty());
    }

    #[test]
    fn ignores_subscription_acks() {
        let msg = r#"{"method": "subscribe", "success": true, "result": {"channel": "trade"}}"#;
        assert!(Kraken::parse(&mut (), msg).is_empty());
    }

    #[test]
    fn ignores_bad_json() {
        assert!(Kraken::parse(&mut (), "not json {{{").is_empty());
    }

    #[test]
    fn missing_timestamp_falls_back_to_wall_clock() {
        let msg = r#"{
            "channel": "trade",
            "data": [{"symbol": "BTC/USD", "price": "68500.25", "qty": "0.001", "side": "sell"}]
        }"#;
        let before = unix_now();
        let ticks = Kraken::parse(&mut (), msg);
        let after = unix_now();
        assert_eq!(ticks.len(), 1);
        assert!(ticks[0].timestamp >= before && ticks[0].timestamp <= after);
    }
}
