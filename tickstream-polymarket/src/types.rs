//! Market interval and descriptor types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// BTC up/down market cadence on Polymarket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketInterval {
    M5,
    M15,
    H4,
}

impl MarketInterval {
    pub const ALL: [MarketInterval; 3] = [Self::M5, Self::M15, Self::H4];

    /// Slug prefix used by Gamma event slugs, e.g. `btc-updown-5m-1700000100`.
    pub fn slug_prefix(&self) -> &'static str {
        match self {
            Self::M5 => "btc-updown-5m",
            Self::M15 => "btc-updown-15m",
            Self::H4 => "btc-updown-4h",
        }
    }

    /// Market window length in seconds.
    pub fn window_secs(&self) -> i64 {
        match self {
            Self::M5 => 300,
            Self::M15 => 900,
            Self::H4 => 14_400,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::H4 => "4h",
        }
    }
}

impl fmt::Display for MarketInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid interval {0:?}, must be one of 5m, 15m, 4h")]
pub struct InvalidInterval(pub String);

impl FromStr for MarketInterval {
    type Err = InvalidInterval;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "5m" => Ok(Self::M5),
            "15m" => Ok(Self::M15),
            "4h" => Ok(Self::H4),
            other => Err(InvalidInterval(other.to_string())),
        }
    }
}

/// One discovered Polymarket market, as resolved from a Gamma event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDescriptor {
    pub url: String,
    pub title: String,
    pub slug: String,
    pub market_id: String,
    pub condition_id: String,
    pub question_id: String,
    /// CLOB token ids, one per outcome.
    pub token_ids: Vec<String>,
    pub outcomes: Vec<String>,
    pub description: String,
    /// ISO-8601, as returned by Gamma.
    pub event_start_time: Option<String>,
    pub end_date: Option<String>,
}

fn iso_to_epoch(ts: &str) -> Option<f64> {
    chrono::DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.timestamp_micros() as f64 / 1_000_000.0)
}

impl MarketDescriptor {
    pub fn event_start_epoch(&self) -> Option<f64> {
        self.event_start_time.as_deref().and_then(iso_to_epoch)
    }

    pub fn end_epoch(&self) -> Option<f64> {
        self.end_date.as_deref().and_then(iso_to_epoch)
    }
}
