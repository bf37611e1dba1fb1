//! OKX BTC-USDT trade stream.

use serde_json::{json, Value};

use tickstream_core::Tick;

use crate::feed::{num, Venue};

pub struct Okx;

impl Venue for Okx {
    const SOURCE: &'static str = "okx";
    const FEED_NAME: &'static str = "okx-btc-usdt";
    const WS_URL: &'static str = "wss://ws.okx.com:8443/ws/v5/public";

    type State = ();

    fn subscribe() -> Option<String> {
        Some(
            json!({
                "op": "subscribe",
                "args": [{"channel": "trades", "instId": "BTC-USDT"}],
            })
            .to_string(),
        )
    }

    fn parse(_state: &mut (), text: &str) -> Vec<Tick> {
        let Ok(raw) = serde_json::from_str::<Value>(text) else {
            return Vec::new();
        };
        let channel = raw
            .get("arg")
            .and_then(|arg| arg.get("channel"))
            .and_then(Value::as_str);
        if channel != Some("trades") {
            return Vec::new();
        }
        let Some(trades) = raw.get("data").and_then(Value::as_array) else {
            return Vec::new();
        };

        trades
            .iter()
            .filter_map(|trade| {
                let price = trade.get("px").and_then(num)?;
                let ts_ms = trade.get("ts").and_then(num).unwrap_or(0.0);
                let mut tick = Tick::new(ts_ms / 1000.0, price, Self::SOURCE);
                if let Some(size) = trade.get("sz").and_then(num) {
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
    use tickstream_core::DataFeed;

    use crate::feed::ExchangeFeed;

    use super::*;

    const SAMPLE_TRADE: &str = r#"{
        "arg": {"channel": "trades", "instId": "BTC-USDT"},
        "data": [
            {
                "instId": "BTC-USDT",
                "tradeId": "123456",
                "px": "68500.25",
                "sz": "0.001",
                "side": "buy",
                "ts": "1700000000123"
            }
        ]
    }"#;

    #[test]
    fn parses_trade() {
        let ticks = Okx::parse(&mut (), SAMPLE_TRADE);
        assert_eq!(ticks.len(), 1);
        let tick = &ticks[0];
        assert_eq!(tick.price, 68500.25);
        assert_eq!(tick.source, "okx");
        assert!((tick.timestamp - 1700000000.123).abs() < 0.001);
        assert_eq!(tick.size, Some(0.001));
        assert_eq!(tick.side.as_deref(), Some("buy"));
    }

    #[test]
    fn ignores_other_channels() {
        let msg = r#"{"arg": {"channel": "tickers"}, "data": [{"px": "100"}]}"#;
        assert!(Okx::parse(&mut (), msg).is_empty());
    }

    #[test]
    fn ignores_subscription_acks() {
        let msg = r#"{"event": "subscribe", "arg": {"channel": "trades", "instId": "BTC-USDT"}}"#;
        assert!(Okx::parse(&mut (), msg).is_empty());
    }

    #[test]
    fn ignores_bad_json() {
        assert!(Okx::parse(&mut (), "not json {{{").is_empty());
    }

    #[test]
    fn zero_price_trade_is_dropped() {
        let feed: ExchangeFeed<Okx> = ExchangeFeed::new();
        let msg = r#"{
            "arg": {"channel": "trades", "instId": "BTC-USDT"},
            "data": [{"px": "0", "sz": "1", "side": "buy", "ts": "1700000000000"}]
        }"#;
        feed.handle_text(&mut (), msg);
        assert!(feed.fetch().is_none());
        assert_eq!(feed.counters().message_count(), 0);
    }
}
