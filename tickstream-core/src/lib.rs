//! Core types and traits for the tickstream market-data collector.
//!
//! Everything venue-independent lives here: the normalized record types
//! ([`Tick`], [`OrderBookSnapshot`]), feed health classification, the
//! thread-safe accumulate-and-drain buffer, the clock-aligned flush
//! scheduler, and the `DataFeed` / `Publisher` contracts the rest of the
//! workspace implements.

pub mod book;
pub mod buffer;
pub mod error;
pub mod feed;
pub mod health;
pub mod publisher;
pub mod tick;
pub mod window;

pub use book::OrderBookSnapshot;
pub use buffer::{MarketData, MarketDataBuffer};
pub use error::PublishError;
pub use feed::{DataFeed, RecordSink};
pub use health::{FeedCounters, FeedHealth, FeedStatus, HealthThresholds};
pub use publisher::Publisher;
pub use tick::Tick;
pub use window::{next_boundary, sleep_until_boundary, unix_now, WindowedBatcher};
