//! Exchange trade feeds.
//!
//! Seven WebSocket venues (Binance, Bitfinex, Bybit, Coinbase, Gemini,
//! Kraken, OKX) share one reconnecting stream driver; each venue contributes
//! only its wire contract through the [`Venue`] trait. Chainlink is a
//! JSON-RPC poller with its own lifecycle.

pub mod binance;
pub mod bitfinex;
pub mod bybit;
pub mod chainlink;
pub mod coinbase;
pub mod feed;
pub mod gemini;
pub mod kraken;
pub mod okx;
mod stream;

pub use binance::Binance;
pub use bitfinex::Bitfinex;
pub use bybit::Bybit;
pub use chainlink::ChainlinkFeed;
pub use coinbase::Coinbase;
pub use feed::{ExchangeFeed, Venue};
pub use gemini::Gemini;
pub use kraken::Kraken;
pub use okx::Okx;
