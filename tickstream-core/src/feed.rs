//! Feed and sink contracts

use std::sync::Arc;

use async_trait::async_trait;

use crate::health::FeedHealth;

/// Receiver for records produced by a feed.
///
/// A sink must be cheap to call from the feed's connection task; the standard
/// implementation is [`MarketDataBuffer`](crate::MarketDataBuffer), which
/// just appends under a lock.
pub trait RecordSink<T>: Send + Sync {
    fn accept(&self, record: T);
}

/// A continuously running market data source.
///
/// Implementations own their connection lifecycle: `start` spawns the
/// background tasks and returns immediately, `stop` shuts them down within a
/// bounded time. Records flow out through whatever sinks were attached before
/// `start`.
#[async_trait]
pub trait DataFeed: Send + Sync {
    /// Record type this feed produces.
    type Record;

    /// Stable identifier, e.g. `"coinbase-btc-usd"`.
    fn name(&self) -> &str;

    /// Attach a sink to receive every record this feed produces. Must be
    /// called before `start`.
    fn attach_sink(&self, sink: Arc<dyn RecordSink<Self::Record>>);

    /// Begin streaming. Idempotent: a second call on a running feed is a
    /// no-op.
    async fn start(&self);

    /// Stop streaming and release resources within a bounded time.
    async fn stop(&self);

    /// Latest record seen, if any.
    fn fetch(&self) -> Option<Self::Record>;

    /// Point-in-time health classification.
    fn health(&self) -> FeedHealth;
}
