//! Feed health classification
//!
//! Every feed carries a [`FeedCounters`] block written only by its own
//! connection task; [`FeedCounters::health`] derives the OK/DEGRADED/DOWN
//! classification from those counters on every call. Health is never stored
//! as a transition history.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::window::unix_now;

/// Health status of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedStatus {
    Ok,
    Degraded,
    Down,
}

/// Point-in-time health report for one feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedHealth {
    pub status: FeedStatus,
    /// Epoch seconds of the last successfully parsed message; 0.0 = never.
    pub last_update: f64,
    pub message: String,
}

/// Staleness thresholds, in seconds. Venue-specific: the websocket feeds use
/// 30/60 while the slow on-chain poller uses 90/300.
#[derive(Debug, Clone, Copy)]
pub struct HealthThresholds {
    pub stale: f64,
    pub down: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            stale: 30.0,
            down: 60.0,
        }
    }
}

impl HealthThresholds {
    pub const fn new(stale: f64, down: f64) -> Self {
        Self { stale, down }
    }
}

/// Substrings in an error message that indicate a venue-side geo block.
const GEO_MARKERS: [&str; 4] = ["451", "403", "restricted", "forbidden"];

/// Liveness counters for one feed.
///
/// Written only by the feed's own connection task; read from any task via
/// [`health`](Self::health). A few milliseconds of staleness on reads is
/// acceptable.
#[derive(Debug)]
pub struct FeedCounters {
    thresholds: HealthThresholds,
    connected: AtomicBool,
    geo_blocked: AtomicBool,
    /// f64 bits of the last-message epoch timestamp.
    last_message: AtomicU64,
    messages: AtomicU64,
    errors: AtomicU64,
}

impl FeedCounters {
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self {
            thresholds,
            connected: AtomicBool::new(false),
            geo_blocked: AtomicBool::new(false),
            last_message: AtomicU64::new(0.0f64.to_bits()),
            messages: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Record one successfully parsed message.
    pub fn mark_message(&self) {
        self.last_message
            .store(unix_now().to_bits(), Ordering::Relaxed);
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection error, classifying geo blocks from the error text.
    pub fn record_error(&self, text: &str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        let lower = text.to_lowercase();
        if GEO_MARKERS.iter().any(|m| lower.contains(m)) {
            self.geo_blocked.store(true, Ordering::Relaxed);
        }
    }

    /// Record a connection close. Close code 451 marks the feed geo-blocked.
    pub fn record_close(&self, code: Option<u16>) {
        self.connected.store(false, Ordering::Relaxed);
        if code == Some(451) {
            self.geo_blocked.store(true, Ordering::Relaxed);
        }
    }

    pub fn is_geo_blocked(&self) -> bool {
        self.geo_blocked.load(Ordering::Relaxed)
    }

    pub fn message_count(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn last_message_time(&self) -> f64 {
        f64::from_bits(self.last_message.load(Ordering::Relaxed))
    }

    /// Classify the current health from the counters.
    ///
    /// A geo block is sticky DOWN and overrides every other signal until the
    /// feed reconnects cleanly.
    pub fn health(&self) -> FeedHealth {
        let last = self.last_message_time();
        let msgs = self.message_count();
        let errors = self.error_count();
        let age = if last > 0.0 {
            unix_now() - last
        } else {
            f64::INFINITY
        };

        if self.is_geo_blocked() {
            return FeedHealth {
                status: FeedStatus::Down,
                last_update: last,
                message: "geo-blocked".to_string(),
            };
        }

        if !self.is_connected() || last == 0.0 {
            return FeedHealth {
                status: FeedStatus::Down,
                last_update: last,
                message: format!("disconnected, errors={errors}"),
            };
        }

        if age > self.thresholds.down {
            return FeedHealth {
                status: FeedStatus::Down,
                last_update: last,
                message: format!("no data ({age:.0}s), msgs={msgs}, errors={errors}"),
            };
        }

        if age > self.thresholds.stale {
            return FeedHealth {
                status: FeedStatus::Degraded,
                last_update: last,
                message: format!("stale data ({age:.0}s), msgs={msgs}, errors={errors}"),
            };
        }

        FeedHealth {
            status: FeedStatus::Ok,
            last_update: last,
            message: format!("msgs={msgs}, errors={errors}"),
        }
    }

    /// Force the last-message timestamp; used by tests to simulate staleness.
    #[doc(hidden)]
    pub fn set_last_message_time(&self, ts: f64) {
        self.last_message.store(ts.to_bits(), Ordering::Relaxed);
    }
}

impl Default for FeedCounters {
    fn default() -> Self {
        Self::new(HealthThresholds::default())
    }
}
