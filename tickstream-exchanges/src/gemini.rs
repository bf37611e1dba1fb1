//! Gemini BTCUSD trade stream.
//!
//! The v1 marketdata endpoint subscribes via the URL. Per-event `timestamp`
//! values are milliseconds, with the frame-level `timestampms` as fallback.

use serde_json::Value;

use tickstream_core::{unix_now, Tick};

use crate::feed::{num, Venue};

pub struct Gemini;

impl Venue for Gemini {
    const SOURCE: &'static str = "gemini";
    const FEED_NAME: &'static str = "gemini-btc-usd";
    const WS_URL: &'static str = "wss://api.gemini.com/v1/marketdata/BTCUSD?trades=true";

    type State = ();

    fn parse(_state: &mut (), text: &str) -> Vec<Tick> {
        let Ok(raw) = serde_json::from_str::<Value>(text) else {
            return Vec::new();
        };
        if !matches!(
            raw.get("type").and_then(Value::as_str),
            Some("trade") | Some("update")
        ) {
            return Vec::new();
        }

        let events = raw
            .get("events")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut ticks = Vec::new();
        for event in events {
            if event.get("type").and_then(Value::as_str) != Some("trade") {
                continue;
            }
            let Some(price) = event.get("price").and_then(num) else {
                continue;
            };
            let timestamp = event
                .get("timestamp")
                .and_then(num)
                .or_else(|| raw.get("timestampms").and_then(num))
                .map(|ms| ms / 1000.0)
                .unwrap_or_else(unix_now);
            let mut tick = Tick::new(timestamp, price, Self::SOURCE);
            if let Some(size) = event.get("amount").and_then(num) {
                tick = tick.with_size(size);
            }
            if let Some(side) = event.get("makerSide").and_then(Value::as_str) {
                tick = tick.with_side(side);
            }
            ticks.push(tick);
        }
        ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TRADE: &str = r#"{
        "type": "update",
        "eventId": 123456,
        "timestamp": 1700000000,
        "timestampms": 1700000000123,
        "socket_sequence": 10,
        "events": [
            {
                "type": "trade",
                "tid": 123456,
                "price": "68500.25",
                "amount": "0.001",
                "makerSide": "bid",
                "timestamp": 1700000000123
            }
        ]
    }"#;

    #[test]
    fn parses_trade_event() {
        let ticks = Gemini::parse(&mut (), SAMPLE_TRADE);
        assert_eq!(ticks.len(), 1);
        let tick = &ticks[0];
        assert_eq!(tick.price, 68500.25);
        assert_eq!(tick.source, "gemini");
        assert!((tick.timestamp - 1700000000.123).abs() < 0.001);
        assert_eq!(tick.size, Some(0.001));
        assert_eq!(tick.side.as_deref(), Some("bid"));
    }

    #[test]
    fn falls_back_to_frame_timestampms() {
        let msg = r#"{
            "type": "update",
            "timestampms": 1700000000456,
            "events": [{"type": "trade", "price": "68500.25", "amount": "0.1"}]
        }"#;
        let ticks = Gemini::parse(&mut (), msg);
        assert!((ticks[0].timestamp - 1700000000.456).abs() < 0.001);
    }

    #[test]
    fn ignores_non_trade_events() {
        let msg = r#"{
            "type": "update",
            "events": [{"type": "change", "price": "68500.25", "side": "bid"}]
        }"#;
        assert!(Gemini::parse(&mut (), msg).is_empty());
    }

    #[test]
    fn ignores_heartbeats() {
        assert!(Gemini::parse(&mut (), r#"{"type": "heartbeat"}"#).is_empty());
    }

    #[test]
    fn ignores_bad_json() {
        assert!(Gemini::parse(&mut (), "not json {{{").is_empty());
    }
}
