//! Clock-aligned flush windows
//!
//! Flush boundaries are aligned to wall-clock multiples of the window length
//! so that keys from independent processes line up. A batch covering
//! [window_start, window_end) is published under
//! `"{venue}/{feed}/{start:.6}-{end:.6}"`.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info};

use crate::buffer::{MarketData, MarketDataBuffer};
use crate::feed::RecordSink;
use crate::publisher::Publisher;

/// Current unix time as fractional seconds.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Next wall-clock multiple of `window_secs` at or after `now`.
pub fn next_boundary(now: f64, window_secs: f64) -> f64 {
    (now / window_secs).ceil() * window_secs
}

/// Sleep until the next window boundary, or return `None` if the stop signal
/// fires first.
pub async fn sleep_until_boundary(
    window_secs: f64,
    stop: &mut watch::Receiver<bool>,
) -> Option<f64> {
    if *stop.borrow() {
        return None;
    }
    let now = unix_now();
    let boundary = next_boundary(now, window_secs);
    let delay = (boundary - now).max(0.0);
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs_f64(delay)) => Some(boundary),
        _ = stop.changed() => None,
    }
}

/// Accumulates records and publishes each non-empty window as one object.
///
/// Records arrive through the [`RecordSink`] handle from [`sink`](Self::sink);
/// [`run`](Self::run) drives the boundary loop and performs a final flush at
/// the moment of shutdown. Publish failures are logged and the window advances
/// regardless, so one bad flush never wedges the schedule.
pub struct WindowedBatcher<T> {
    venue: String,
    feed_name: String,
    window_secs: f64,
    publisher: Arc<dyn Publisher>,
    buffer: Arc<MarketDataBuffer<T>>,
    window_start: Mutex<f64>,
}

impl<T: Serialize + Send + Sync + 'static> WindowedBatcher<T> {
    pub fn new(
        venue: impl Into<String>,
        feed_name: impl Into<String>,
        window_secs: f64,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            venue: venue.into(),
            feed_name: feed_name.into(),
            window_secs,
            publisher,
            buffer: Arc::new(MarketDataBuffer::new()),
            window_start: Mutex::new(0.0),
        }
    }

    /// Sink handle to hand to the producing feed.
    pub fn sink(&self) -> Arc<dyn RecordSink<T>> {
        Arc::clone(&self.buffer) as Arc<dyn RecordSink<T>>
    }

    pub fn window_secs(&self) -> f64 {
        self.window_secs
    }

    /// Pin the start of the current window. Tests use this to make keys
    /// deterministic; `run` calls it with the current time.
    pub fn begin_at(&self, start: f64) {
        *self.window_start.lock() = start;
    }

    /// Drain the buffer and publish it as the window ending at `window_end`.
    /// Empty windows publish nothing. Either way the next window starts at
    /// `window_end`.
    pub async fn flush(&self, window_end: f64) {
        let window_start = {
            let mut start = self.window_start.lock();
            let current = *start;
            *start = window_end;
            current
        };

        let records = self.buffer.export();
        if records.is_empty() {
            return;
        }

        let key = format!(
            "{}/{}/{:.6}-{:.6}",
            self.venue, self.feed_name, window_start, window_end
        );
        let payload = match serde_json::to_vec(&records) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("[Batcher] {} serialization failed: {}", key, e);
                return;
            }
        };
        match self.publisher.publish(&key, &payload).await {
            Ok(()) => info!("[Batcher] published {} records to {}", records.len(), key),
            Err(e) => error!("[Batcher] publish to {} failed: {}", key, e),
        }
    }

    /// Flush on every window boundary until the stop signal fires, then flush
    /// once more with the current time as the window end.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        self.begin_at(unix_now());
        while let Some(boundary) = sleep_until_boundary(self.window_secs, &mut stop).await {
            self.flush(boundary).await;
        }
        self.flush(unix_now()).await;
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex as PlMutex;

    use super::*;
    use crate::error::PublishError;

    #[test]
    fn boundary_on_the_mark_stays_put() {
        assert_eq!(next_boundary(300.0, 300.0), 300.0);
    }

    #[test]
    fn boundary_just_past_rolls_forward() {
        assert_eq!(next_boundary(301.0, 300.0), 600.0);
    }

    #[test]
    fn boundary_just_before_rounds_up() {
        assert_eq!(next_boundary(599.9, 300.0), 600.0);
    }

    /// Minimal in-memory store capturing publish calls.
    #[derive(Default)]
    struct CapturePublisher {
        calls: PlMutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl Publisher for CapturePublisher {
        async fn publish(&self, key: &str, data: &[u8]) -> Result<(), PublishError> {
            self.calls.lock().push((key.to_string(), data.to_vec()));
            Ok(())
        }

        async fn get(&self, _key: &str) -> Result<Vec<u8>, PublishError> {
            Err(PublishError::NotFound)
        }

        async fn delete(&self, _key: &str) -> Result<(), PublishError> {
            Ok(())
        }

        async fn list_keys(&self, _prefix: &str) -> Result<Vec<String>, PublishError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn empty_window_publishes_nothing() {
        let store = Arc::new(CapturePublisher::default());
        let batcher: WindowedBatcher<u32> =
            WindowedBatcher::new("binance", "binance-btc-usd", 300.0, store.clone());
        batcher.begin_at(300.0);
        batcher.flush(600.0).await;
        assert!(store.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn flush_publishes_once_with_window_key() {
        let store = Arc::new(CapturePublisher::default());
        let batcher: WindowedBatcher<u32> =
            WindowedBatcher::new("binance", "binance-btc-usd", 300.0, store.clone());
        batcher.begin_at(1700000100.0);
        batcher.sink().accept(42);
        batcher.sink().accept(43);
        batcher.flush(1700000400.0).await;

        let calls = store.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].0,
            "binance/binance-btc-usd/1700000100.000000-1700000400.000000"
        );
        let body: Vec<u32> = serde_json::from_slice(&calls[0].1).unwrap();
        assert_eq!(body, vec![42, 43]);
    }

    #[tokio::test]
    async fn window_advances_even_when_empty() {
        let store = Arc::new(CapturePublisher::default());
        let batcher: WindowedBatcher<u32> =
            WindowedBatcher::new("v", "f", 300.0, store.clone());
        batcher.begin_at(300.0);
        batcher.flush(600.0).await;
        batcher.sink().accept(1);
        batcher.flush(900.0).await;

        let calls = store.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "v/f/600.000000-900.000000");
    }

    #[tokio::test]
    async fn stop_signal_ends_the_boundary_wait() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        assert_eq!(sleep_until_boundary(300.0, &mut rx).await, None);
    }
}
