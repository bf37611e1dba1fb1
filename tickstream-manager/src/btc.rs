//! Static multi-exchange tick collection.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{error, info};

use tickstream_core::{
    sleep_until_boundary, unix_now, DataFeed, MarketData, MarketDataBuffer, Publisher, RecordSink,
    Tick,
};

use crate::manager::{FeedManager, ManagerError};

const WINDOW_SECONDS: f64 = 300.0;

pub type TickFeed = Arc<dyn DataFeed<Record = Tick>>;

#[derive(Clone)]
struct Wiring {
    feeds: Vec<TickFeed>,
    publishers: Vec<Arc<dyn Publisher>>,
    market_data: Arc<MarketDataBuffer<Tick>>,
}

/// Orchestrates the exchange tick feeds against one shared accumulator.
///
/// Every feed records into the same buffer; on each 5-minute clock boundary
/// the buffer is drained, grouped by exchange source, and each group goes to
/// every publisher under its own key. A failed publish is logged and never
/// stops the other groups or publishers.
pub struct BtcFeedManager {
    wiring: Mutex<Option<Wiring>>,
    stop_tx: watch::Sender<bool>,
    window_start: Mutex<f64>,
}

impl BtcFeedManager {
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            wiring: Mutex::new(None),
            stop_tx,
            window_start: Mutex::new(0.0),
        }
    }

    /// Wire feeds, publishers and the shared accumulator. Must precede
    /// `run()`.
    pub fn create(
        &self,
        feeds: Vec<TickFeed>,
        publishers: Vec<Arc<dyn Publisher>>,
        market_data: Arc<MarketDataBuffer<Tick>>,
    ) {
        *self.wiring.lock() = Some(Wiring {
            feeds,
            publishers,
            market_data,
        });
    }

    async fn flush(&self, wiring: &Wiring, window_end: f64) {
        let window_start = {
            let mut start = self.window_start.lock();
            let current = *start;
            *start = window_end;
            current
        };

        let ticks = wiring.market_data.export();
        if ticks.is_empty() {
            return;
        }

        for (source, group) in group_by_source(ticks) {
            let segment = feed_segment(&wiring.feeds, &source);
            let key = format!("{source}/{segment}/{window_start:.6}-{window_end:.6}");
            let payload = match serde_json::to_vec(&group) {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("Serialization failed for {}: {}", key, e);
                    continue;
                }
            };
            for publisher in &wiring.publishers {
                if let Err(e) = publisher.publish(&key, &payload).await {
                    error!("Publish failed for {}: {}", key, e);
                }
            }
            info!("Published {} ticks to {}", group.len(), key);
        }
    }
}

impl Default for BtcFeedManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Feed-name segment of the publish key for one source. Taken from the wired
/// feed whose name carries the source prefix, so USDT-quoted feeds keep their
/// own names in keys; sources with no matching feed fall back to `-btc-usd`.
fn feed_segment(feeds: &[TickFeed], source: &str) -> String {
    feeds
        .iter()
        .map(|feed| feed.name())
        .find(|name| name.split('-').next() == Some(source))
        .map(str::to_string)
        .unwrap_or_else(|| format!("{source}-btc-usd"))
}

fn group_by_source(ticks: Vec<Tick>) -> BTreeMap<String, Vec<Tick>> {
    let mut by_source: BTreeMap<String, Vec<Tick>> = BTreeMap::new();
    for tick in ticks {
        by_source.entry(tick.source.clone()).or_default().push(tick);
    }
    by_source
}

#[async_trait]
impl FeedManager for BtcFeedManager {
    fn name(&self) -> &str {
        "btc-data"
    }

    async fn run(&self) -> Result<(), ManagerError> {
        let wiring = self.wiring.lock().clone().ok_or(ManagerError::NotWired)?;

        info!(
            "Starting {} feed manager with {} feeds",
            self.name(),
            wiring.feeds.len()
        );
        *self.window_start.lock() = unix_now();

        for feed in &wiring.feeds {
            feed.attach_sink(Arc::clone(&wiring.market_data) as Arc<dyn RecordSink<Tick>>);
        }
        for feed in &wiring.feeds {
            feed.start().await;
        }
        info!("All feeds started");

        let mut stop_rx = self.stop_tx.subscribe();
        while let Some(boundary) = sleep_until_boundary(WINDOW_SECONDS, &mut stop_rx).await {
            self.flush(&wiring, boundary).await;
        }

        // Final flush covers the partial window at shutdown.
        self.flush(&wiring, unix_now()).await;

        for feed in &wiring.feeds {
            feed.stop().await;
        }
        info!("{} feed manager stopped", self.name());
        Ok(())
    }

    async fn stop(&self) {
        // send_replace: a stop issued before run() subscribes must persist.
        self.stop_tx.send_replace(true);
    }
}
