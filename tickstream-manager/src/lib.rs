//! Feed orchestration.
//!
//! A manager owns a set of feeds and a publish policy: [`BtcFeedManager`]
//! runs the static exchange feeds against a shared accumulator and flushes
//! on clock windows; [`PolymarketFeedManager`] rotates through short-lived
//! markets, publishing each one as it closes.

pub mod btc;
pub mod manager;
pub mod polymarket;

pub use btc::BtcFeedManager;
pub use manager::{FeedManager, ManagerError};
pub use polymarket::PolymarketFeedManager;
