//! Polymarket order book collection.
//!
//! [`GammaClient`] discovers the currently active BTC up/down market for an
//! interval; [`PolymarketBookFeed`] streams its order book over the CLOB
//! market channel until the market closes.

pub mod discovery;
pub mod feed;
pub mod types;

pub use discovery::{GammaClient, MarketDiscovery, GAMMA_API};
pub use feed::{parse_order_book, PolymarketBookFeed};
pub use types::{InvalidInterval, MarketDescriptor, MarketInterval};
