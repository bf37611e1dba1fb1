//! Rotating Polymarket market collection.
//!
//! One manager per interval. The loop is discover → collect → publish:
//! discovery retries with doubling backoff, collection runs a fresh feed per
//! market until its close signal (or a deadline slightly past the market's
//! end), and every closed market is published as a single document.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::watch;
use tracing::{error, info, warn};

use tickstream_core::{
    unix_now, DataFeed, MarketData, MarketDataBuffer, OrderBookSnapshot, Publisher, RecordSink,
};
use tickstream_polymarket::{MarketDescriptor, MarketDiscovery, MarketInterval, PolymarketBookFeed};

use crate::manager::{FeedManager, ManagerError};

const INITIAL_BACKOFF: f64 = 5.0;
const MAX_BACKOFF: f64 = 60.0;
const CLOSE_BUFFER_SECONDS: f64 = 30.0;
const MIN_TIMEOUT: f64 = 60.0;

fn next_backoff(backoff: f64) -> f64 {
    (backoff * 2.0).min(MAX_BACKOFF)
}

/// Deadline for one market's collection: a little past its scheduled end,
/// never less than a minute.
fn close_timeout(end_epoch: Option<f64>, now: f64) -> f64 {
    match end_epoch {
        Some(end) => (end - now + CLOSE_BUFFER_SECONDS).max(MIN_TIMEOUT),
        None => MIN_TIMEOUT,
    }
}

#[derive(Clone)]
struct Wiring {
    publishers: Vec<Arc<dyn Publisher>>,
    market_data: Arc<MarketDataBuffer<OrderBookSnapshot>>,
}

pub struct PolymarketFeedManager {
    interval: MarketInterval,
    name: String,
    discovery: Arc<dyn MarketDiscovery>,
    wiring: Mutex<Option<Wiring>>,
    stop_tx: watch::Sender<bool>,
}

impl PolymarketFeedManager {
    pub fn new(interval: MarketInterval, discovery: Arc<dyn MarketDiscovery>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            interval,
            name: format!("polymarket-btc-{}", interval.label()),
            discovery,
            wiring: Mutex::new(None),
            stop_tx,
        }
    }

    /// Wire publishers and the snapshot accumulator. Feeds are created per
    /// market inside `run()`.
    pub fn create(
        &self,
        publishers: Vec<Arc<dyn Publisher>>,
        market_data: Arc<MarketDataBuffer<OrderBookSnapshot>>,
    ) {
        *self.wiring.lock() = Some(Wiring {
            publishers,
            market_data,
        });
    }

    /// Discover the current market, backing off on failure until stopped.
    async fn discover_market(
        &self,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> Option<MarketDescriptor> {
        let mut backoff = INITIAL_BACKOFF;
        info!("[{}] Discovering market", self.name);
        while !*stop_rx.borrow() {
            if let Some(market) = self.discovery.current_market(self.interval).await {
                info!(
                    "[{}] Discovered market, slug={}, market_id={}, end={}, tokens={}",
                    self.name,
                    market.slug,
                    market.market_id,
                    market.end_date.as_deref().unwrap_or("?"),
                    market.token_ids.len()
                );
                return Some(market);
            }
            warn!("[{}] No market found, retrying in {:.0}s", self.name, backoff);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs_f64(backoff)) => {}
                _ = stop_rx.changed() => return None,
            }
            backoff = next_backoff(backoff);
        }
        None
    }

    async fn wait_for_close(
        &self,
        feed: &PolymarketBookFeed,
        market: &MarketDescriptor,
        stop_rx: &mut watch::Receiver<bool>,
    ) {
        let timeout = close_timeout(market.end_epoch(), unix_now());
        info!(
            "[{}] Waiting for market close, slug={}, timeout={:.0}s",
            self.name, market.slug, timeout
        );

        let mut closed_rx = feed.closed();
        tokio::select! {
            _ = async {
                while !*closed_rx.borrow_and_update() {
                    if closed_rx.changed().await.is_err() {
                        break;
                    }
                }
            } => info!("[{}] Market closed, slug={}", self.name, market.slug),
            _ = tokio::time::sleep(Duration::from_secs_f64(timeout)) => {
                warn!(
                    "[{}] Wait timed out after {:.0}s for slug={}",
                    self.name, timeout, market.slug
                );
            }
            _ = stop_rx.changed() => {
                info!("[{}] Wait interrupted by stop signal", self.name);
            }
        }
    }

    fn build_key(&self, market: &MarketDescriptor) -> String {
        let start = market.event_start_epoch().unwrap_or(0.0);
        let end = market.end_epoch().unwrap_or(0.0);
        format!("polymarket/{}/{start:.6}-{end:.6}", self.name)
    }

    /// Publish everything collected for one market as a single document.
    async fn publish(&self, wiring: &Wiring, market: &MarketDescriptor) {
        let snapshots = wiring.market_data.export();
        if snapshots.is_empty() {
            warn!("[{}] No snapshots to publish for {}", self.name, market.slug);
            return;
        }

        let key = self.build_key(market);
        let count = snapshots.len();
        let payload = json!({
            "slug": market.slug,
            "interval": self.interval.label(),
            "market_id": market.market_id,
            "event_start_time": market.event_start_time.clone().unwrap_or_default(),
            "end_date": market.end_date.clone().unwrap_or_default(),
            "snapshot_count": count,
            "snapshots": snapshots,
        });

        for publisher in &wiring.publishers {
            match publisher.publish_json(&key, &payload).await {
                Ok(()) => info!("[{}] Published {} snapshots to {}", self.name, count, key),
                Err(e) => error!("[{}] Publish failed, key={}: {}", self.name, key, e),
            }
        }
    }
}

#[async_trait]
impl FeedManager for PolymarketFeedManager {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<(), ManagerError> {
        let wiring = self.wiring.lock().clone().ok_or(ManagerError::NotWired)?;

        info!("Starting {} feed manager", self.name);
        let mut stop_rx = self.stop_tx.subscribe();

        while !*stop_rx.borrow() {
            let Some(market) = self.discover_market(&mut stop_rx).await else {
                break;
            };

            let feed =
                PolymarketBookFeed::new(market.token_ids.clone(), market.end_date.as_deref());
            feed.attach_sink(
                Arc::clone(&wiring.market_data) as Arc<dyn RecordSink<OrderBookSnapshot>>
            );
            feed.start().await;
            info!("[{}] Feed started for {}", self.name, market.slug);

            self.wait_for_close(&feed, &market, &mut stop_rx).await;
            self.publish(&wiring, &market).await;
            feed.stop().await;
        }

        info!("{} feed manager stopped", self.name);
        Ok(())
    }

    async fn stop(&self) {
        info!("[{}] Stop requested", self.name);
        // send_replace: a stop issued before run() subscribes must persist.
        self.stop_tx.send_replace(true);
    }
}
