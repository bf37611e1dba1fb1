//! Coinbase Advanced Trade BTC-USD trade stream.

use serde_json::{json, Value};

use tickstream_core::{unix_now, Tick};

use crate::feed::{iso_to_unix, num, Venue};

pub struct Coinbase;

impl Venue for Coinbase {
    const SOURCE: &'static str = "coinbase";
    const FEED_NAME: &'static str = "coinbase-btc-usd";
    const WS_URL: &'static str = "wss://advanced-trade-ws.coinbase.com";

    type State = ();

    fn subscribe() -> Option<String> {
        Some(
            json!({
                "type": "subscribe",
                "channel": "market_trades",
                "product_ids": ["BTC-USD"],
            })
            .to_string(),
        )
    }

    fn parse(_state: &mut (), text: &str) -> Vec<Tick> {
        let Ok(raw) = serde_json::from_str::<Value>(text) else {
            return Vec::new();
        };
        if raw.get("channel").and_then(Value::as_str) != Some("market_trades") {
            return Vec::new();
        }

        let events = raw
            .get("events")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut ticks = Vec::new();
        for event in events {
            let trades = event
                .get("trades")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            for trade in trades {
                let Some(price) = trade.get("price").and_then(num) else {
                    continue;
                };
                let timestamp = trade
                    .get("time")
                    .and_then(Value::as_str)
                    .and_then(iso_to_unix)
                    .unwrap_or_else(unix_now);
                let mut tick = Tick::new(timestamp, price, Self::SOURCE);
                if let Some(size) = trade.get("size").and_then(num) {
                    tick = tick.with_size(size);
                }
                if let Some(side) = trade.get("side").and_then(Value::as_str) {
                    tick = tick.with_side(side.to_lowercase());
                }
                ticks.push(tick);
            }
        }
        ticks
    }
}
