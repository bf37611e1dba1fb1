//! Generic exchange feed built from a venue wire contract.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use tickstream_core::{
    DataFeed, FeedCounters, FeedHealth, HealthThresholds, Publisher, RecordSink, Tick,
    WindowedBatcher,
};

use crate::stream;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Wire contract of one exchange's trade stream.
///
/// Implementations carry no connection logic; [`ExchangeFeed`] supplies the
/// shared connect/subscribe/read/reconnect driver. Timestamp units differ per
/// venue and each parser converts its own.
pub trait Venue: Send + Sync + 'static {
    /// Tick source tag, e.g. `"binance"`.
    const SOURCE: &'static str;
    /// Feed identifier, e.g. `"binance-btc-usd"`.
    const FEED_NAME: &'static str;
    const WS_URL: &'static str;

    /// Per-connection parser state, reset on every reconnect.
    type State: Default + Send;

    fn thresholds() -> HealthThresholds {
        HealthThresholds::default()
    }

    /// Subscribe payload sent right after connecting. `None` for venues that
    /// subscribe through the URL.
    fn subscribe() -> Option<String> {
        None
    }

    /// Parse one text frame into zero or more ticks. Unparseable or
    /// irrelevant frames yield the empty vec.
    fn parse(state: &mut Self::State, text: &str) -> Vec<Tick>;
}

/// State shared between an [`ExchangeFeed`] handle and its connection task.
pub(crate) struct FeedShared {
    pub(crate) counters: FeedCounters,
    sinks: Mutex<Vec<Arc<dyn RecordSink<Tick>>>>,
    latest: Mutex<Option<Tick>>,
}

impl FeedShared {
    pub(crate) fn new(thresholds: HealthThresholds) -> Self {
        Self {
            counters: FeedCounters::new(thresholds),
            sinks: Mutex::new(Vec::new()),
            latest: Mutex::new(None),
        }
    }

    pub(crate) fn attach_sink(&self, sink: Arc<dyn RecordSink<Tick>>) {
        self.sinks.lock().push(sink);
    }

    pub(crate) fn latest(&self) -> Option<Tick> {
        self.latest.lock().clone()
    }

    /// Deliver parsed ticks to every sink, dropping non-positive prices.
    /// Sinks are invoked outside the lock.
    pub(crate) fn deliver(&self, ticks: Vec<Tick>) {
        for tick in ticks {
            if tick.price <= 0.0 {
                continue;
            }
            *self.latest.lock() = Some(tick.clone());
            self.counters.mark_message();
            let sinks: Vec<_> = self.sinks.lock().clone();
            for sink in &sinks {
                sink.accept(tick.clone());
            }
        }
    }
}

/// A venue trade stream with reconnection, liveness counters and optional
/// windowed publishing.
pub struct ExchangeFeed<V: Venue> {
    shared: Arc<FeedShared>,
    batcher: Mutex<Option<Arc<WindowedBatcher<Tick>>>>,
    running: AtomicBool,
    stop_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    _venue: PhantomData<V>,
}

impl<V: Venue> ExchangeFeed<V> {
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(FeedShared::new(V::thresholds())),
            batcher: Mutex::new(None),
            running: AtomicBool::new(false),
            stop_tx,
            tasks: Mutex::new(Vec::new()),
            _venue: PhantomData,
        }
    }

    /// Also publish this feed's ticks on clock-aligned windows, independent
    /// of any manager-level batching.
    pub fn with_batcher(self, publisher: Arc<dyn Publisher>, window_secs: f64) -> Self {
        let batcher = Arc::new(WindowedBatcher::new(
            V::SOURCE,
            V::FEED_NAME,
            window_secs,
            publisher,
        ));
        self.shared.attach_sink(batcher.sink());
        *self.batcher.lock() = Some(batcher);
        self
    }

    /// Run one raw frame through the venue parser and the delivery path.
    #[cfg(test)]
    pub(crate) fn handle_text(&self, state: &mut V::State, text: &str) {
        self.shared.deliver(V::parse(state, text));
    }

    #[cfg(test)]
    pub(crate) fn counters(&self) -> &FeedCounters {
        &self.shared.counters
    }
}

impl<V: Venue> Default for ExchangeFeed<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V: Venue> DataFeed for ExchangeFeed<V> {
    type Record = Tick;

    fn name(&self) -> &str {
        V::FEED_NAME
    }

    fn attach_sink(&self, sink: Arc<dyn RecordSink<Tick>>) {
        self.shared.attach_sink(sink);
    }

    async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(stream::run_stream::<V>(
            Arc::clone(&self.shared),
            self.stop_tx.subscribe(),
        )));
        if let Some(batcher) = self.batcher.lock().clone() {
            let stop_rx = self.stop_tx.subscribe();
            tasks.push(tokio::spawn(async move { batcher.run(stop_rx).await }));
        }
    }

    async fn stop(&self) {
        // send_replace: the value must survive even when no task has
        // subscribed yet, so a stop issued before start() still sticks.
        self.stop_tx.send_replace(true);
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for mut task in tasks {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task)
                .await
                .is_err()
            {
                task.abort();
            }
        }
        self.shared.counters.set_connected(false);
    }

    fn fetch(&self) -> Option<Tick> {
        self.shared.latest()
    }

    fn health(&self) -> FeedHealth {
        self.shared.counters.health()
    }
}

/// Numeric field that venues send either as a JSON number or a string.
pub(crate) fn num(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// ISO-8601 timestamp to fractional unix seconds.
pub(crate) fn iso_to_unix(ts: &str) -> Option<f64> {
    chrono::DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.timestamp_micros() as f64 / 1_000_000.0)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tickstream_store::MemoryPublisher;

    use super::*;

    /// Frame format for driver tests: a bare JSON number is the price.
    struct PriceOnly;

    impl Venue for PriceOnly {
        const SOURCE: &'static str = "priceonly";
        const FEED_NAME: &'static str = "priceonly-btc-usd";
        const WS_URL: &'static str = "wss://example.invalid";

        type State = ();

        fn parse(_state: &mut (), text: &str) -> Vec<Tick> {
            serde_json::from_str::<f64>(text)
                .map(|price| vec![Tick::new(1700000000.0, price, Self::SOURCE)])
                .unwrap_or_default()
        }
    }

    #[tokio::test]
    async fn stop_signal_sticks_without_subscribers() {
        let feed: ExchangeFeed<PriceOnly> = ExchangeFeed::new();
        feed.stop().await;
        // A task subscribing after the fact must still observe the stop.
        assert!(*feed.stop_tx.subscribe().borrow());
    }

    #[tokio::test]
    async fn batcher_publishes_parsed_ticks_on_flush() {
        let store = Arc::new(MemoryPublisher::new());
        let feed: ExchangeFeed<PriceOnly> =
            ExchangeFeed::new().with_batcher(store.clone(), 300.0);

        feed.handle_text(&mut (), "68500.25");
        feed.handle_text(&mut (), "68501.0");

        let batcher = feed.batcher.lock().clone().unwrap();
        batcher.begin_at(1700000100.0);
        batcher.flush(1700000400.0).await;

        let keys = store.list_keys("").await.unwrap();
        assert_eq!(
            keys,
            vec!["priceonly/priceonly-btc-usd/1700000100.000000-1700000400.000000"]
        );
        let ticks: Vec<Tick> =
            serde_json::from_slice(&store.get(&keys[0]).await.unwrap()).unwrap();
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].price, 68500.25);
    }

    #[test]
    fn num_accepts_numbers_and_strings() {
        assert_eq!(num(&json!(1.5)), Some(1.5));
        assert_eq!(num(&json!("68500.25")), Some(68500.25));
        assert_eq!(num(&json!("nope")), None);
        assert_eq!(num(&json!(null)), None);
    }

    #[test]
    fn iso_to_unix_parses_zulu_timestamps() {
        let ts = iso_to_unix("2023-11-14T22:13:20.123Z").unwrap();
        assert!((ts - 1700000000.123).abs() < 0.001);
    }

    #[test]
    fn iso_to_unix_rejects_garbage() {
        assert_eq!(iso_to_unix("not a timestamp"), None);
        assert_eq!(iso_to_unix(""), None);
    }
}
