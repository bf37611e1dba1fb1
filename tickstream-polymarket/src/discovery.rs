//! Gamma API market discovery.
//!
//! BTC up/down markets have predictable slugs: the interval prefix plus the
//! epoch of the window they cover. Discovery checks the current window and
//! the next one, and accepts the first market still accepting orders. Any
//! failure yields `None`; retry policy belongs to the caller.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use tickstream_core::unix_now;

use crate::types::{MarketDescriptor, MarketInterval};

pub const GAMMA_API: &str = "https://gamma-api.polymarket.com";

const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Discovery seam for the rotating manager; implemented by [`GammaClient`]
/// and by test doubles.
#[async_trait]
pub trait MarketDiscovery: Send + Sync {
    async fn current_market(&self, interval: MarketInterval) -> Option<MarketDescriptor>;
}

/// Client for the public Gamma events API.
pub struct GammaClient {
    base_url: String,
    client: reqwest::Client,
}

impl GammaClient {
    pub fn new() -> Self {
        Self::with_base_url(GAMMA_API)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Find the active market for `interval`, checking the current window
    /// slug and the next one.
    pub async fn current_market(&self, interval: MarketInterval) -> Option<MarketDescriptor> {
        let now = unix_now() as i64;
        let window = interval.window_secs();
        let current_window = now - now.rem_euclid(window);

        for offset in [0, window] {
            let slug = format!("{}-{}", interval.slug_prefix(), current_window + offset);
            debug!("[Gamma] Querying events, slug={}", slug);
            let events = match self.events_by_slug(&slug).await {
                Ok(events) => events,
                Err(e) => {
                    warn!("[Gamma] Request failed, slug={}: {}", slug, e);
                    continue;
                }
            };
            if let Some(descriptor) = descriptor_from_events(&events) {
                return Some(descriptor);
            }
        }

        warn!(
            "[Gamma] No active market, prefix={}, window={}s",
            interval.slug_prefix(),
            window
        );
        None
    }

    async fn events_by_slug(&self, slug: &str) -> Result<Value, reqwest::Error> {
        self.client
            .get(format!("{}/events", self.base_url))
            .query(&[("slug", slug)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    /// General-purpose event search. Failures come back as the empty list.
    pub async fn find_events(&self, slug_contains: &str, closed: bool, limit: u32) -> Vec<Value> {
        let result = self
            .client
            .get(format!("{}/events", self.base_url))
            .query(&[
                ("slug_contains", slug_contains),
                ("closed", if closed { "true" } else { "false" }),
                ("limit", &limit.to_string()),
            ])
            .send()
            .await;

        let response = match result.and_then(|r| r.error_for_status()) {
            Ok(response) => response,
            Err(e) => {
                warn!("[Gamma] Search failed: {}", e);
                return Vec::new();
            }
        };
        match response.json::<Value>().await {
            Ok(Value::Array(events)) => events,
            Ok(_) => Vec::new(),
            Err(e) => {
                warn!("[Gamma] Search returned invalid JSON: {}", e);
                Vec::new()
            }
        }
    }
}

impl Default for GammaClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDiscovery for GammaClient {
    async fn current_market(&self, interval: MarketInterval) -> Option<MarketDescriptor> {
        GammaClient::current_market(self, interval).await
    }
}

/// Extract a descriptor from a Gamma `/events?slug=` response. The market
/// must be accepting orders; `clobTokenIds` and `outcomes` arrive as
/// JSON-encoded strings.
pub fn descriptor_from_events(events: &Value) -> Option<MarketDescriptor> {
    let event = events.as_array()?.first()?;
    let markets = event.get("markets").and_then(Value::as_array)?;
    let market = markets.first()?;

    if !market
        .get("acceptingOrders")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return None;
    }

    let token_ids: Vec<String> = market
        .get("clobTokenIds")
        .and_then(Value::as_str)
        .and_then(|raw| serde_json::from_str(raw).ok())?;
    let outcomes: Vec<String> = market
        .get("outcomes")
        .and_then(Value::as_str)
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default();

    let slug = event.get("slug").and_then(Value::as_str)?.to_string();
    let text = |value: &Value, key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    Some(MarketDescriptor {
        url: format!("https://polymarket.com/event/{slug}"),
        title: text(event, "title"),
        slug,
        market_id: text(market, "id"),
        condition_id: text(market, "conditionId"),
        question_id: text(market, "questionID"),
        token_ids,
        outcomes,
        description: text(market, "description"),
        event_start_time: event
            .get("startTime")
            .and_then(Value::as_str)
            .map(str::to_string),
        end_date: event
            .get("endDate")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}
