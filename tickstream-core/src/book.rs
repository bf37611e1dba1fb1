//! Normalized order book snapshot

use serde::{Deserialize, Serialize};

/// Number of levels per side used for the volume-weighted mid.
const WEIGHTED_MID_DEPTH: usize = 5;

/// Snapshot of one instrument's order book at one moment.
///
/// Derived fields (`best_bid`, `best_ask`, `mid_price`, `spread`,
/// `weighted_mid`, `imbalance`) are computed once by [`from_levels`] from the
/// raw levels and never recomputed afterwards.
///
/// [`from_levels`]: OrderBookSnapshot::from_levels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    /// Identifier for the traded asset (Polymarket token id, etc).
    pub asset_id: String,
    /// Unix epoch timestamp of the snapshot.
    pub timestamp: f64,
    /// (price, size) levels sorted descending by price.
    pub bids: Vec<(f64, f64)>,
    /// (price, size) levels sorted ascending by price.
    pub asks: Vec<(f64, f64)>,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub mid_price: Option<f64>,
    pub spread: Option<f64>,
    pub bid_volume: f64,
    pub ask_volume: f64,
    pub weighted_mid: Option<f64>,
    pub imbalance: Option<f64>,
}

impl OrderBookSnapshot {
    /// Build a snapshot from already-sorted levels, computing every derived
    /// field. `bids` must be sorted descending and `asks` ascending by price.
    pub fn from_levels(
        asset_id: impl Into<String>,
        timestamp: f64,
        bids: Vec<(f64, f64)>,
        asks: Vec<(f64, f64)>,
    ) -> Self {
        let bid_volume: f64 = bids.iter().map(|(_, s)| s).sum();
        let ask_volume: f64 = asks.iter().map(|(_, s)| s).sum();

        let best_bid = bids.first().map(|(p, _)| *p);
        let best_ask = asks.first().map(|(p, _)| *p);

        let (mid_price, spread, weighted_mid) = match (best_bid, best_ask) {
            (Some(bb), Some(ba)) => (
                Some((bb + ba) / 2.0),
                Some(ba - bb),
                weighted_mid(
                    &bids[..bids.len().min(WEIGHTED_MID_DEPTH)],
                    &asks[..asks.len().min(WEIGHTED_MID_DEPTH)],
                ),
            ),
            _ => (None, None, None),
        };

        let total_volume = bid_volume + ask_volume;
        let imbalance = if total_volume > 0.0 {
            Some((bid_volume - ask_volume) / total_volume)
        } else {
            None
        };

        Self {
            asset_id: asset_id.into(),
            timestamp,
            bids,
            asks,
            best_bid,
            best_ask,
            mid_price,
            spread,
            bid_volume,
            ask_volume,
            weighted_mid,
            imbalance,
        }
    }
}

/// Volume-weighted mid price from the top levels of each side.
fn weighted_mid(bids: &[(f64, f64)], asks: &[(f64, f64)]) -> Option<f64> {
    if bids.is_empty() || asks.is_empty() {
        return None;
    }
    let bid_den: f64 = bids.iter().map(|(_, s)| s).sum();
    let ask_den: f64 = asks.iter().map(|(_, s)| s).sum();
    if bid_den == 0.0 || ask_den == 0.0 {
        return None;
    }
    let bid_top = bids[0].0;
    let ask_top = asks[0].0;
    Some((bid_top * ask_den + ask_top * bid_den) / (bid_den + ask_den))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_derived_fields() {
        let snap = OrderBookSnapshot::from_levels(
            "token-1",
            1700000000.0,
            vec![(0.55, 100.0), (0.54, 50.0)],
            vec![(0.57, 80.0), (0.58, 20.0)],
        );
        assert_eq!(snap.best_bid, Some(0.55));
        assert_eq!(snap.best_ask, Some(0.57));
        assert!((snap.mid_price.unwrap() - 0.56).abs() < 1e-9);
        assert!((snap.spread.unwrap() - 0.02).abs() < 1e-9);
        assert_eq!(snap.bid_volume, 150.0);
        assert_eq!(snap.ask_volume, 100.0);
        // (150 - 100) / 250
        assert!((snap.imbalance.unwrap() - 0.2).abs() < 1e-9);
        // (0.55 * 100 + 0.57 * 150) / 250
        assert!((snap.weighted_mid.unwrap() - 0.562).abs() < 1e-9);
    }

    #[test]
    fn best_prices_are_extremes_of_each_side() {
        let snap = OrderBookSnapshot::from_levels(
            "token-1",
            0.0,
            vec![(0.6, 1.0), (0.5, 1.0), (0.4, 1.0)],
            vec![(0.7, 1.0), (0.8, 1.0)],
        );
        let max_bid = snap.bids.iter().map(|(p, _)| *p).fold(f64::MIN, f64::max);
        let min_ask = snap.asks.iter().map(|(p, _)| *p).fold(f64::MAX, f64::min);
        assert_eq!(snap.best_bid, Some(max_bid));
        assert_eq!(snap.best_ask, Some(min_ask));
    }

    #[test]
    fn empty_book_has_no_derived_fields() {
        let snap = OrderBookSnapshot::from_levels("t", 0.0, vec![], vec![]);
        assert_eq!(snap.best_bid, None);
        assert_eq!(snap.mid_price, None);
        assert_eq!(snap.spread, None);
        assert_eq!(snap.weighted_mid, None);
        assert_eq!(snap.imbalance, None);
        assert_eq!(snap.bid_volume, 0.0);
    }

    #[test]
    fn one_sided_book_has_volume_but_no_mid() {
        let snap =
            OrderBookSnapshot::from_levels("t", 0.0, vec![(0.5, 10.0)], vec![]);
        assert_eq!(snap.best_bid, Some(0.5));
        assert_eq!(snap.best_ask, None);
        assert_eq!(snap.mid_price, None);
        assert_eq!(snap.imbalance, Some(1.0));
    }

    #[test]
    fn levels_serialize_as_pairs() {
        let snap =
            OrderBookSnapshot::from_levels("t", 1.0, vec![(0.5, 10.0)], vec![(0.6, 5.0)]);
        let value = serde_json::to_value(&snap).unwrap();
        assert_eq!(value["bids"][0][0], 0.5);
        assert_eq!(value["bids"][0][1], 10.0);
        assert_eq!(value["asks"][0][0], 0.6);
    }
}
