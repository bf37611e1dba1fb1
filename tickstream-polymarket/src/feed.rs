//! Polymarket CLOB order book WebSocket feed.
//!
//! Subscribes to the market channel for a set of CLOB token ids and delivers
//! one [`OrderBookSnapshot`] per book event. Polymarket expects a literal
//! `PING` text frame every 10 seconds. A feed built with an `end_date`
//! watches the clock and fires a sticky closed signal once the market's end
//! time passes; `stop()` fires it too.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{error, info, warn};

use tickstream_core::{DataFeed, FeedCounters, FeedHealth, OrderBookSnapshot, RecordSink};

pub const POLYMARKET_WS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";

const PING_INTERVAL: Duration = Duration::from_secs(10);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const CLOSE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Timestamps arrive either as epoch strings (sometimes fractional) or as
/// ISO-8601; anything else becomes 0.0 and the snapshot is kept.
fn parse_timestamp(raw: &str) -> f64 {
    if raw.is_empty() {
        return 0.0;
    }
    if let Ok(ts) = raw.parse::<f64>() {
        return ts;
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.timestamp_micros() as f64 / 1_000_000.0)
        .unwrap_or(0.0)
}

fn num(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn levels(raw: Option<&Value>) -> Vec<(f64, f64)> {
    let mut out = Vec::new();
    if let Some(entries) = raw.and_then(Value::as_array) {
        for entry in entries {
            let price = entry.get("price").and_then(num);
            let size = entry.get("size").and_then(num);
            if let (Some(price), Some(size)) = (price, size) {
                if size > 0.0 {
                    out.push((price, size));
                }
            }
        }
    }
    out
}

/// Parse one market-channel frame into snapshots.
///
/// Frames arrive as a bare list of events, as `{"data": ...}` with either a
/// list or a single event inside, or as a single event object. Events other
/// than `book` / `price_change` (or with no `event_type` at all) and events
/// without an `asset_id` are skipped.
pub fn parse_order_book(message: &Value) -> Vec<OrderBookSnapshot> {
    let single;
    let events: &[Value] = if let Some(list) = message.as_array() {
        list
    } else if let Some(data) = message.get("data") {
        if let Some(list) = data.as_array() {
            list
        } else {
            single = [data.clone()];
            &single
        }
    } else {
        single = [message.clone()];
        &single
    };

    let mut snapshots = Vec::new();
    for event in events {
        if !event.is_object() {
            continue;
        }
        let event_type = event
            .get("event_type")
            .and_then(Value::as_str)
            .unwrap_or("");
        if !matches!(event_type, "book" | "price_change" | "") {
            continue;
        }
        let asset_id = event.get("asset_id").and_then(Value::as_str).unwrap_or("");
        if asset_id.is_empty() {
            continue;
        }

        let mut bids = levels(event.get("bids"));
        let mut asks = levels(event.get("asks"));
        bids.sort_by(|a, b| b.0.total_cmp(&a.0));
        asks.sort_by(|a, b| a.0.total_cmp(&b.0));

        let timestamp = event
            .get("timestamp")
            .and_then(Value::as_str)
            .map(parse_timestamp)
            .unwrap_or(0.0);

        snapshots.push(OrderBookSnapshot::from_levels(asset_id, timestamp, bids, asks));
    }
    snapshots
}

struct BookShared {
    counters: FeedCounters,
    sinks: Mutex<Vec<Arc<dyn RecordSink<OrderBookSnapshot>>>>,
    latest: Mutex<Option<OrderBookSnapshot>>,
}

impl BookShared {
    fn new() -> Self {
        Self {
            counters: FeedCounters::default(),
            sinks: Mutex::new(Vec::new()),
            latest: Mutex::new(None),
        }
    }

    fn handle_text(&self, text: &str) {
        let Ok(raw) = serde_json::from_str::<Value>(text) else {
            return;
        };
        self.counters.mark_message();
        let snapshots = parse_order_book(&raw);
        let Some(last) = snapshots.last() else {
            return;
        };
        *self.latest.lock() = Some(last.clone());
        let sinks: Vec<_> = self.sinks.lock().clone();
        for snapshot in snapshots {
            for sink in &sinks {
                sink.accept(snapshot.clone());
            }
        }
    }
}

enum BookCommand {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

/// Order book feed for one market's token ids.
pub struct PolymarketBookFeed {
    asset_ids: Vec<String>,
    end_date: Option<DateTime<Utc>>,
    shared: Arc<BookShared>,
    running: AtomicBool,
    stop_tx: watch::Sender<bool>,
    closed_tx: watch::Sender<bool>,
    command_tx: mpsc::Sender<BookCommand>,
    command_rx: Mutex<Option<mpsc::Receiver<BookCommand>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PolymarketBookFeed {
    /// `end_date` is the market's ISO-8601 close time; without one (or with
    /// an unparseable one) the feed never auto-closes.
    pub fn new(asset_ids: Vec<String>, end_date: Option<&str>) -> Self {
        let end_date = end_date.and_then(|raw| match DateTime::parse_from_rfc3339(raw) {
            Ok(dt) => Some(dt.with_timezone(&Utc)),
            Err(_) => {
                warn!(
                    "[Polymarket] Could not parse end_date {:?}, feed will not auto-close",
                    raw
                );
                None
            }
        });
        let (stop_tx, _) = watch::channel(false);
        let (closed_tx, _) = watch::channel(false);
        let (command_tx, command_rx) = mpsc::channel(100);
        Self {
            asset_ids,
            end_date,
            shared: Arc::new(BookShared::new()),
            running: AtomicBool::new(false),
            stop_tx,
            closed_tx,
            command_tx,
            command_rx: Mutex::new(Some(command_rx)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Watch that flips to `true` once the market closes or the feed stops.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    /// Add token ids to the live subscription.
    pub async fn subscribe(&self, asset_ids: Vec<String>) {
        let _ = self
            .command_tx
            .send(BookCommand::Subscribe(asset_ids))
            .await;
    }

    pub async fn unsubscribe(&self, asset_ids: Vec<String>) {
        let _ = self
            .command_tx
            .send(BookCommand::Unsubscribe(asset_ids))
            .await;
    }

    #[cfg(test)]
    pub(crate) fn handle_text(&self, text: &str) {
        self.shared.handle_text(text);
    }

    #[cfg(test)]
    pub(crate) fn message_count(&self) -> u64 {
        self.shared.counters.message_count()
    }

    async fn connection_loop(
        shared: Arc<BookShared>,
        asset_ids: Vec<String>,
        mut command_rx: mpsc::Receiver<BookCommand>,
        mut stop: watch::Receiver<bool>,
    ) {
        loop {
            if *stop.borrow() {
                return;
            }

            info!("[Polymarket WS] Connecting to {}", POLYMARKET_WS_URL);
            let connected = tokio::select! {
                result = connect_async(POLYMARKET_WS_URL) => result,
                _ = stop.changed() => return,
            };

            match connected {
                Ok((ws_stream, _)) => {
                    info!("[Polymarket WS] Connected");
                    shared.counters.set_connected(true);
                    let (mut write, mut read) = ws_stream.split();

                    let subscribe = json!({
                        "assets_ids": asset_ids,
                        "type": "market",
                    });
                    if let Err(e) = write.send(Message::Text(subscribe.to_string().into())).await
                    {
                        warn!("[Polymarket WS] Subscribe failed: {}", e);
                        shared.counters.record_error(&e.to_string());
                    }

                    let mut ping_timer = interval(PING_INTERVAL);
                    loop {
                        tokio::select! {
                            msg = read.next() => match msg {
                                Some(Ok(Message::Text(text))) => shared.handle_text(&text),
                                Some(Ok(Message::Ping(data))) => {
                                    if write.send(Message::Pong(data)).await.is_err() {
                                        break;
                                    }
                                }
                                Some(Ok(Message::Close(frame))) => {
                                    info!("[Polymarket WS] Connection closed by server");
                                    shared.counters.record_close(frame.map(|f| u16::from(f.code)));
                                    break;
                                }
                                Some(Err(e)) => {
                                    error!("[Polymarket WS] Error: {}", e);
                                    shared.counters.record_error(&e.to_string());
                                    break;
                                }
                                None => break,
                                _ => {}
                            },
                            cmd = command_rx.recv() => {
                                let payload = match cmd {
                                    Some(BookCommand::Subscribe(ids)) => json!({
                                        "assets_ids": ids,
                                        "operation": "subscribe",
                                    }),
                                    Some(BookCommand::Unsubscribe(ids)) => json!({
                                        "assets_ids": ids,
                                        "operation": "unsubscribe",
                                    }),
                                    None => continue,
                                };
                                if let Err(e) = write.send(Message::Text(payload.to_string().into())).await {
                                    warn!("[Polymarket WS] Command send failed: {}", e);
                                }
                            }
                            _ = ping_timer.tick() => {
                                if write.send(Message::Text("PING".into())).await.is_err() {
                                    break;
                                }
                            }
                            _ = stop.changed() => {
                                shared.counters.set_connected(false);
                                return;
                            }
                        }
                    }
                    shared.counters.set_connected(false);
                }
                Err(e) => {
                    error!("[Polymarket WS] Connect failed: {}", e);
                    shared.counters.record_error(&e.to_string());
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                _ = stop.changed() => return,
            }
        }
    }

    /// Fire the closed signal once wall-clock time reaches `end`.
    async fn monitor_close(
        end: DateTime<Utc>,
        closed_tx: watch::Sender<bool>,
        stop_tx: watch::Sender<bool>,
        mut stop: watch::Receiver<bool>,
    ) {
        loop {
            if Utc::now() >= end {
                info!("[Polymarket] Market end time reached");
                closed_tx.send_replace(true);
                stop_tx.send_replace(true);
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(CLOSE_POLL_INTERVAL) => {}
                _ = stop.changed() => return,
            }
        }
    }
}

#[async_trait]
impl DataFeed for PolymarketBookFeed {
    type Record = OrderBookSnapshot;

    fn name(&self) -> &str {
        "polymarket"
    }

    fn attach_sink(&self, sink: Arc<dyn RecordSink<OrderBookSnapshot>>) {
        self.shared.sinks.lock().push(sink);
    }

    async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(command_rx) = self.command_rx.lock().take() else {
            return;
        };
        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(Self::connection_loop(
            Arc::clone(&self.shared),
            self.asset_ids.clone(),
            command_rx,
            self.stop_tx.subscribe(),
        )));
        if let Some(end) = self.end_date {
            tasks.push(tokio::spawn(Self::monitor_close(
                end,
                self.closed_tx.clone(),
                self.stop_tx.clone(),
                self.stop_tx.subscribe(),
            )));
        }
    }

    async fn stop(&self) {
        // send_replace keeps the value when nothing is subscribed, so a feed
        // stopped before start() still reads as closed.
        self.stop_tx.send_replace(true);
        self.closed_tx.send_replace(true);
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

    fn fetch(&self) -> Option<OrderBookSnapshot> {
        self.shared.latest.lock().clone()
    }

    fn health(&self) -> FeedHealth {
        self.shared.counters.health()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn book_event() -> Value {
        json!({
            "event_type": "book",
            "asset_id": "111",
            "market": "0xabc",
            "timestamp": "1700000000123.5",
            "bids": [
                {"price": "0.54", "size": "50"},
                {"price": "0.55", "size": "100"},
                {"price": "0.50", "size": "0"}
            ],
            "asks": [
                {"price": "0.58", "size": "20"},
                {"price": "0.57", "size": "80"}
            ]
        })
    }

    #[test]
    fn parses_book_event_sorted_and_filtered() {
        let snaps = parse_order_book(&book_event());
        assert_eq!(snaps.len(), 1);
        let snap = &snaps[0];
        assert_eq!(snap.asset_id, "111");
        // Bids descending, zero-size level dropped.
        assert_eq!(snap.bids, vec![(0.55, 100.0), (0.54, 50.0)]);
        // Asks ascending.
        assert_eq!(snap.asks, vec![(0.57, 80.0), (0.58, 20.0)]);
        assert_eq!(snap.best_bid, Some(0.55));
        assert_eq!(snap.best_ask, Some(0.57));
        // Numeric timestamp string kept verbatim.
        assert_eq!(snap.timestamp, 1700000000123.5);
    }

    #[test]
    fn parses_list_and_data_wrapped_payloads() {
        let as_list = json!([book_event(), book_event()]);
        assert_eq!(parse_order_book(&as_list).len(), 2);

        let wrapped_list = json!({"data": [book_event()]});
        assert_eq!(parse_order_book(&wrapped_list).len(), 1);

        let wrapped_single = json!({"data": book_event()});
        assert_eq!(parse_order_book(&wrapped_single).len(), 1);
    }

    #[test]
    fn skips_foreign_event_types_and_missing_asset_ids() {
        let trade = json!({"event_type": "last_trade_price", "asset_id": "111"});
        assert!(parse_order_book(&trade).is_empty());

        let anonymous = json!({"event_type": "book", "asset_id": "", "bids": [], "asks": []});
        assert!(parse_order_book(&anonymous).is_empty());
    }

    #[test]
    fn price_change_and_untyped_events_accepted() {
        let change = json!({
            "event_type": "price_change",
            "asset_id": "222",
            "bids": [{"price": "0.40", "size": "5"}],
            "asks": []
        });
        let snaps = parse_order_book(&change);
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].best_bid, Some(0.40));

        let untyped = json!({"asset_id": "333", "bids": [], "asks": []});
        assert_eq!(parse_order_book(&untyped).len(), 1);
    }

    #[test]
    fn timestamp_fallbacks() {
        assert_eq!(parse_timestamp("1700000000.5"), 1700000000.5);
        assert!((parse_timestamp("2023-11-14T22:13:20Z") - 1700000000.0).abs() < 0.001);
        assert_eq!(parse_timestamp("garbage"), 0.0);
        assert_eq!(parse_timestamp(""), 0.0);
    }

    #[test]
    fn handle_text_tracks_latest_snapshot() {
        let feed = PolymarketBookFeed::new(vec!["111".to_string()], None);
        assert!(feed.fetch().is_none());
        feed.handle_text(&book_event().to_string());
        let snap = feed.fetch().unwrap();
        assert_eq!(snap.asset_id, "111");
        assert_eq!(feed.message_count(), 1);
    }

    #[test]
    fn malformed_json_is_dropped_silently() {
        let feed = PolymarketBookFeed::new(vec![], None);
        feed.handle_text("not json {{{");
        assert!(feed.fetch().is_none());
        assert_eq!(feed.message_count(), 0);
    }

    #[test]
    fn bad_end_date_means_no_auto_close() {
        let feed = PolymarketBookFeed::new(vec![], Some("not a date"));
        assert!(feed.end_date.is_none());
        assert!(!feed.is_closed());
    }

    #[tokio::test]
    async fn stop_marks_feed_closed() {
        let feed = PolymarketBookFeed::new(vec!["111".to_string()], None);
        feed.stop().await;
        assert!(feed.is_closed());
    }

    #[tokio::test]
    async fn monitor_fires_once_end_time_passes() {
        let (stop_tx, _) = watch::channel(false);
        let (closed_tx, mut closed_rx) = watch::channel(false);
        let end = Utc::now() - chrono::Duration::seconds(1);
        tokio::spawn(PolymarketBookFeed::monitor_close(
            end,
            closed_tx,
            stop_tx.clone(),
            stop_tx.subscribe(),
        ));
        tokio::time::timeout(Duration::from_secs(2), closed_rx.changed())
            .await
            .expect("closed signal within deadline")
            .unwrap();
        assert!(*closed_rx.borrow());
        assert!(*stop_tx.subscribe().borrow());
    }
}
