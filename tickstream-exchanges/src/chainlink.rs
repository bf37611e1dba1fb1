//! Chainlink BTC/USD oracle poller.
//!
//! Polls `latestRoundData()` on the mainnet aggregator over plain JSON-RPC
//! `eth_call` and emits one tick per new oracle round. The tick timestamp is
//! the on-chain `updatedAt`, not the poll time, and the staleness thresholds
//! are wider than the websocket feeds because rounds land minutes apart.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use tickstream_core::{
    unix_now, DataFeed, FeedHealth, FeedStatus, HealthThresholds, RecordSink, Tick,
};

use crate::feed::FeedShared;

const BTC_USD_AGGREGATOR: &str = "0xF4030086522a5bEEa4988F8cA5B36dbC97BeE88c";
/// 4-byte selector of `latestRoundData()`.
const LATEST_ROUND_DATA: &str = "0xfeaf968c";
const ANSWER_DECIMALS: f64 = 1e8;

const STALE_THRESHOLD: f64 = 90.0;
const DOWN_THRESHOLD: f64 = 300.0;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
const RPC_TIMEOUT: Duration = Duration::from_secs(10);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq)]
struct RoundData {
    round_id: u128,
    price: f64,
    updated_at: f64,
}

/// Decode the ABI-encoded return of `latestRoundData()`: five 32-byte words
/// `(roundId, answer, startedAt, updatedAt, answeredInRound)`.
fn decode_latest_round(result: &str) -> Option<RoundData> {
    let hex = result.strip_prefix("0x")?;
    if hex.len() < 5 * 64 {
        return None;
    }
    // All values of interest fit in the low 16 bytes of their word. Slicing
    // with get() keeps a non-ASCII result string from panicking mid-char.
    let word = |i: usize| u128::from_str_radix(hex.get(i * 64 + 32..(i + 1) * 64)?, 16).ok();
    let round_id = word(0)?;
    let answer = word(1)?;
    let updated_at = word(3)?;
    Some(RoundData {
        round_id,
        price: answer as f64 / ANSWER_DECIMALS,
        updated_at: updated_at as f64,
    })
}

pub struct ChainlinkFeed {
    rpc_url: Option<String>,
    client: reqwest::Client,
    poll_interval: Duration,
    shared: Arc<FeedShared>,
    running: AtomicBool,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ChainlinkFeed {
    /// `rpc_url` comes from `ETH_RPC_URL`; without one the feed stays idle
    /// and reports DOWN.
    pub fn new(rpc_url: Option<String>) -> Self {
        let rpc_url = rpc_url.filter(|url| !url.is_empty());
        let (stop_tx, _) = watch::channel(false);
        Self {
            rpc_url,
            client: reqwest::Client::builder()
                .timeout(RPC_TIMEOUT)
                .build()
                .unwrap_or_default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            shared: Arc::new(FeedShared::new(HealthThresholds::new(
                STALE_THRESHOLD,
                DOWN_THRESHOLD,
            ))),
            running: AtomicBool::new(false),
            stop_tx,
            task: Mutex::new(None),
        }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var("ETH_RPC_URL").ok())
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn poll_loop(
        client: reqwest::Client,
        rpc_url: String,
        poll_interval: Duration,
        shared: Arc<FeedShared>,
        mut stop: watch::Receiver<bool>,
    ) {
        let mut last_round_id: u128 = 0;
        loop {
            if *stop.borrow() {
                return;
            }
            match Self::poll_once(&client, &rpc_url).await {
                Ok(round) => {
                    shared.counters.set_connected(true);
                    if round.round_id != last_round_id {
                        last_round_id = round.round_id;
                        shared.deliver(vec![Tick::new(
                            round.updated_at,
                            round.price,
                            "chainlink",
                        )]);
                    }
                }
                Err(e) => {
                    error!("[chainlink-btc-usd] Poll failed: {}", e);
                    shared.counters.record_error(&e);
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = stop.changed() => return,
            }
        }
    }

    async fn poll_once(client: &reqwest::Client, rpc_url: &str) -> Result<RoundData, String> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [
                {"to": BTC_USD_AGGREGATOR, "data": LATEST_ROUND_DATA},
                "latest",
            ],
        });
        let response: serde_json::Value = client
            .post(rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .json()
            .await
            .map_err(|e| e.to_string())?;

        if let Some(err) = response.get("error") {
            return Err(err.to_string());
        }
        response
            .get("result")
            .and_then(|r| r.as_str())
            .and_then(decode_latest_round)
            .ok_or_else(|| "malformed eth_call result".to_string())
    }
}

#[async_trait]
impl DataFeed for ChainlinkFeed {
    type Record = Tick;

    fn name(&self) -> &str {
        "chainlink-btc-usd"
    }

    fn attach_sink(&self, sink: Arc<dyn RecordSink<Tick>>) {
        self.shared.attach_sink(sink);
    }

    async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(rpc_url) = self.rpc_url.clone() else {
            info!("[chainlink-btc-usd] No ETH_RPC_URL, feed idle");
            return;
        };
        *self.task.lock() = Some(tokio::spawn(Self::poll_loop(
            self.client.clone(),
            rpc_url,
            self.poll_interval,
            Arc::clone(&self.shared),
            self.stop_tx.subscribe(),
        )));
    }

    async fn stop(&self) {
        self.stop_tx.send_replace(true);
        let task = self.task.lock().take();
        if let Some(mut task) = task {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task)
                .await
                .is_err()
            {
                task.abort();
            }
        }
    }

    fn fetch(&self) -> Option<Tick> {
        self.shared.latest()
    }

    fn health(&self) -> FeedHealth {
        if self.rpc_url.is_none() {
            return FeedHealth {
                status: FeedStatus::Down,
                last_update: 0.0,
                message: "no ETH_RPC_URL configured".to_string(),
            };
        }

        let counters = &self.shared.counters;
        let last = counters.last_message_time();
        let rounds = counters.message_count();
        let errors = counters.error_count();

        if last == 0.0 {
            return FeedHealth {
                status: FeedStatus::Down,
                last_update: last,
                message: format!("no data yet, errors={errors}"),
            };
        }

        let age = unix_now() - last;
        if age > DOWN_THRESHOLD {
            return FeedHealth {
                status: FeedStatus::Down,
                last_update: last,
                message: format!("no update ({age:.0}s), rounds={rounds}, errors={errors}"),
            };
        }
        if age > STALE_THRESHOLD {
            return FeedHealth {
                status: FeedStatus::Degraded,
                last_update: last,
                message: format!("stale ({age:.0}s), rounds={rounds}, errors={errors}"),
            };
        }
        FeedHealth {
            status: FeedStatus::Ok,
            last_update: last,
            message: format!("rounds={rounds}, errors={errors}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_round(round_id: u128, answer: u128, started: u128, updated: u128) -> String {
        format!(
            "0x{:064x}{:064x}{:064x}{:064x}{:064x}",
            round_id, answer, started, updated, round_id
        )
    }

    #[test]
    fn decodes_latest_round_words() {
        let hex = encode_round(110680464442257326934, 6_850_025_000_000, 1700000000, 1700000010);
        let round = decode_latest_round(&hex).unwrap();
        assert_eq!(round.round_id, 110680464442257326934);
        assert!((round.price - 68500.25).abs() < 1e-9);
        assert_eq!(round.updated_at, 1700000010.0);
    }

    #[test]
    fn rejects_short_or_unprefixed_results() {
        assert_eq!(decode_latest_round("0x1234"), None);
        assert_eq!(decode_latest_round("feaf968c"), None);
    }

    #[test]
    fn rejects_non_ascii_results_without_panicking() {
        // A multibyte character straddling a word boundary must not split
        // the string mid-char.
        let mut result = String::from("0x");
        result.push_str(&"a".repeat(31));
        result.push('€');
        result.push_str(&"a".repeat(320));
        assert_eq!(decode_latest_round(&result), None);
    }

    #[test]
    fn down_without_rpc_url() {
        let feed = ChainlinkFeed::new(None);
        let h = feed.health();
        assert_eq!(h.status, FeedStatus::Down);
        assert_eq!(h.message, "no ETH_RPC_URL configured");
    }

    #[test]
    fn empty_rpc_url_counts_as_unconfigured() {
        let feed = ChainlinkFeed::new(Some(String::new()));
        assert_eq!(feed.health().message, "no ETH_RPC_URL configured");
    }

    #[test]
    fn down_before_first_round() {
        let feed = ChainlinkFeed::new(Some("http://localhost:8545".to_string()));
        let h = feed.health();
        assert_eq!(h.status, FeedStatus::Down);
        assert!(h.message.contains("no data yet"));
    }

    #[test]
    fn new_round_updates_fetch() {
        let feed = ChainlinkFeed::new(Some("http://localhost:8545".to_string()));
        feed.shared.deliver(vec![Tick::new(1700000010.0, 68500.25, "chainlink")]);
        let tick = feed.fetch().unwrap();
        assert_eq!(tick.source, "chainlink");
        assert_eq!(tick.timestamp, 1700000010.0);
        assert_eq!(feed.health().status, FeedStatus::Ok);
    }
}
