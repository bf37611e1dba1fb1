//! Binance BTC/USDT trade stream.
//!
//! The stream is selected by URL, so no subscribe message is sent. Trade
//! events carry a string price in `p` and a millisecond timestamp in `T`;
//! Binance does not expose size or side on this stream.

use tickstream_core::Tick;

use crate::feed::{num, Venue};

pub struct Binance;

impl Venue for Binance {
    const SOURCE: &'static str = "binance";
    const FEED_NAME: &'static str = "binance-btc-usd";
    const WS_URL: &'static str = "wss://stream.binance.com:9443/ws/btcusdt@trade";

    type State = ();

    fn parse(_state: &mut (), text: &str) -> Vec<Tick> {
        let Ok(raw) = serde_json::from_str::<serde_json::Value>(text) else {
            return Vec::new();
        };
        let Some(price) = raw.get("p").and_then(num) else {
            return Vec::new();
        };
        let ts_ms = raw.get("T").and_then(num).unwrap_or(0.0);
        vec![Tick::new(ts_ms / 1000.0, price, Self::SOURCE)]
    }
}
