//! Bybit BTCUSDT spot trade stream.

use serde_json::{json, Value};

use tickstream_core::Tick;

use crate::feed::{num, Venue};

const TOPIC: &str = "publicTrade.BTCUSDT";

pub struct Bybit;

impl Venue for Bybit {
    const SOURCE: &'static str = "bybit";
    const FEED_NAME: &'static str = "bybit-btc-usdt";
    const WS_URL: &'static str = "wss://stream.bybit.com/v5/public/spot";

    type State = ();

    fn subscribe() -> Option<String> {
        Some(
            json!({
                "op": "subscribe",
                "args": [TOPIC],
            })
            .to_string(),
        )
    }

    fn parse(_state: &mut (), text: &str) -> Vec<Tick> {
        let Ok(raw) = serde_json::from_str::<Value>(text) else {
            return Vec::new();
        };
        if raw.get("topic").and_then(Value::as_str) != Some(TOPIC) {
            return Vec::new();
        }
        let Some(trades) = raw.get("data").and_then(Value::as_array) else {
            return Vec::new();
        };

        trades
            .iter()
            .filter_map(|trade| {
                let price = trade.get("p").and_then(num)?;
                let ts_ms = trade.get("T").and_then(num).unwrap_or(0.0);
                let mut tick = Tick::new(ts_ms / 1000.0, price, Self::SOURCE);
                if let Some(size) = trade.get("v").and_then(num) {
                    tick = tick.with_size(size);
                }
                if let Some(side) = trade.get("S").and_then(Value::as_str) {
                    tick = tick.with_side(side.to_lowercase());
                }
                Some(tick)
            })
            .collect()
    }
}
