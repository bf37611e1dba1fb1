//! Accumulate-and-drain market data buffer

use parking_lot::Mutex;

use crate::feed::RecordSink;

/// Interface for accumulating and exporting market data.
pub trait MarketData<T>: Send + Sync {
    /// Record incoming data from a feed.
    fn record(&self, item: T);

    /// Export everything recorded since the last export, draining the buffer.
    fn export(&self) -> Vec<T>;
}

/// Thread-safe append buffer with atomic drain-on-export.
///
/// `record` appends under the lock; `export` swaps the internal vec for an
/// empty one under the same lock, so concurrent callers can never lose or
/// double-count a record. Only exported batches ever leave the buffer.
#[derive(Debug, Default)]
pub struct MarketDataBuffer<T> {
    items: Mutex<Vec<T>>,
}

impl<T> MarketDataBuffer<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl<T: Send> MarketData<T> for MarketDataBuffer<T> {
    fn record(&self, item: T) {
        self.items.lock().push(item);
    }

    fn export(&self) -> Vec<T> {
        std::mem::take(&mut *self.items.lock())
    }
}

impl<T: Send> RecordSink<T> for MarketDataBuffer<T> {
    fn accept(&self, record: T) {
        self.record(record);
    }
}
