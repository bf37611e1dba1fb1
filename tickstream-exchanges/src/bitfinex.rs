//! Bitfinex tBTCUSD trade stream.
//!
//! Bitfinex confirms the trades subscription with a channel id; trade frames
//! are arrays `[chanId, "te"|"tu", [ID, MTS, AMOUNT, PRICE]]`. The sign of
//! `AMOUNT` encodes the side. Snapshot frames (a list of lists in the third
//! slot) are ignored.

use serde_json::{json, Value};

use tickstream_core::Tick;

use crate::feed::{num, Venue};

pub struct Bitfinex;

#[derive(Debug, Default)]
pub struct BitfinexState {
    trade_chan_id: Option<i64>,
}

impl Venue for Bitfinex {
    const SOURCE: &'static str = "bitfinex";
    const FEED_NAME: &'static str = "bitfinex-btc-usd";
    const WS_URL: &'static str = "wss://api-pub.bitfinex.com/ws/2";

    type State = BitfinexState;

    fn subscribe() -> Option<String> {
        Some(
            json!({
                "event": "subscribe",
                "channel": "trades",
                "symbol": "tBTCUSD",
            })
            .to_string(),
        )
    }

    fn parse(state: &mut BitfinexState, text: &str) -> Vec<Tick> {
        let Ok(raw) = serde_json::from_str::<Value>(text) else {
            return Vec::new();
        };

        // Subscription confirmation carries the channel id; every other
        // object frame (info, heartbeats as dicts) is ignored.
        if let Some(obj) = raw.as_object() {
            if obj.get("event").and_then(Value::as_str) == Some("subscribed")
                && obj.get("channel").and_then(Value::as_str) == Some("trades")
            {
                state.trade_chan_id = obj.get("chanId").and_then(Value::as_i64);
            }
            return Vec::new();
        }

        let Some(frame) = raw.as_array() else {
            return Vec::new();
        };
        if frame.len() < 3 {
            return Vec::new();
        }

        if let Some(expected) = state.trade_chan_id {
            if frame[0].as_i64() != Some(expected) {
                return Vec::new();
            }
        }

        if !matches!(frame[1].as_str(), Some("te") | Some("tu")) {
            return Vec::new();
        }

        let Some(trade) = frame[2].as_array() else {
            return Vec::new();
        };
        if trade.len() < 4 {
            return Vec::new();
        }

        let (Some(mts), Some(amount), Some(price)) =
            (num(&trade[1]), num(&trade[2]), num(&trade[3]))
        else {
            return Vec::new();
        };

        let side = if amount > 0.0 { "buy" } else { "sell" };
        vec![Tick::new(mts / 1000.0, price, Self::SOURCE)
            .with_size(amount.abs())
            .with_side(side)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TRADE: &str = r#"[17470, "te", [401597395, 1700000000123, 0.001, 68500.25]]"#;

    fn subscribed_state() -> BitfinexState {
        let mut state = BitfinexState::default();
        Bitfinex::parse(
            &mut state,
            r#"{"event":"subscribed","channel":"trades","chanId":17470,"symbol":"tBTCUSD"}"#,
        );
        state
    }

    #[test]
    fn captures_channel_id_from_confirmation() {
        let state = subscribed_state();
        assert_eq!(state.trade_chan_id, Some(17470));
    }

    #[test]
    fn parses_executed_trade() {
        let mut state = subscribed_state();
        let ticks = Bitfinex::parse(&mut state, SAMPLE_TRADE);
        assert_eq!(ticks.len(), 1);
        let tick = &ticks[0];
        assert_eq!(tick.price, 68500.25);
        assert_eq!(tick.source, "bitfinex");
        assert!((tick.timestamp - 1700000000.123).abs() < 0.001);
        assert_eq!(tick.size, Some(0.001));
        assert_eq!(tick.side.as_deref(), Some("buy"));
    }

    #[test]
    fn negative_amount_is_a_sell() {
        let mut state = subscribed_state();
        let ticks = Bitfinex::parse(
            &mut state,
            r#"[17470, "tu", [401597396, 1700000001000, -0.5, 69000.0]]"#,
        );
        assert_eq!(ticks[0].side.as_deref(), Some("sell"));
        assert_eq!(ticks[0].size, Some(0.5));
    }

    #[test]
    fn ignores_other_channels() {
        let mut state = subscribed_state();
        let ticks = Bitfinex::parse(
            &mut state,
            r#"[99, "te", [1, 1700000000000, 0.1, 68000.0]]"#,
        );
        assert!(ticks.is_empty());
    }

    #[test]
    fn ignores_heartbeats_and_snapshots() {
        let mut state = subscribed_state();
        assert!(Bitfinex::parse(&mut state, r#"[17470, "hb"]"#).is_empty());
        // Snapshot: third slot is a list of trades, not a single trade.
        assert!(Bitfinex::parse(
            &mut state,
            r#"[17470, [[1, 1700000000000, 0.1, 68000.0]]]"#
        )
        .is_empty());
    }

    #[test]
    fn ignores_bad_json() {
        let mut state = BitfinexState::default();
        assert!(Bitfinex::parse(&mut state, "not json {{{").is_empty());
    }
}
