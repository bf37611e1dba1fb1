//! Tickstream collector daemon.
//!
//! Runs the eight BTC-USD feeds under a [`BtcFeedManager`] plus one
//! [`PolymarketFeedManager`] per configured interval, publishing to S3 when
//! `S3_BUCKET_NAME` is set and to an in-memory store otherwise.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tickstream_core::{DataFeed, MarketDataBuffer, Publisher, Tick};
use tickstream_exchanges::{
    Binance, Bitfinex, Bybit, ChainlinkFeed, Coinbase, ExchangeFeed, Gemini, Kraken, Okx,
};
use tickstream_manager::{BtcFeedManager, FeedManager, PolymarketFeedManager};
use tickstream_polymarket::{GammaClient, MarketInterval};
use tickstream_store::{MemoryPublisher, S3Publisher};

/// Intervals collected when `POLYMARKET_INTERVALS` is unset.
const DEFAULT_INTERVALS: &str = "5m";

fn exchange_feeds() -> Vec<Arc<dyn DataFeed<Record = Tick>>> {
    vec![
        Arc::new(ExchangeFeed::<Binance>::new()),
        Arc::new(ExchangeFeed::<Bitfinex>::new()),
        Arc::new(ExchangeFeed::<Bybit>::new()),
        Arc::new(ExchangeFeed::<Coinbase>::new()),
        Arc::new(ExchangeFeed::<Gemini>::new()),
        Arc::new(ExchangeFeed::<Kraken>::new()),
        Arc::new(ExchangeFeed::<Okx>::new()),
        Arc::new(ChainlinkFeed::from_env()),
    ]
}

fn parse_intervals(raw: &str) -> anyhow::Result<Vec<MarketInterval>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<MarketInterval>()
                .with_context(|| format!("POLYMARKET_INTERVALS entry {s:?}"))
        })
        .collect()
}

async fn build_publisher() -> anyhow::Result<Arc<dyn Publisher>> {
    match std::env::var("S3_BUCKET_NAME").ok().filter(|b| !b.is_empty()) {
        Some(bucket) => {
            let prefix = std::env::var("S3_PREFIX").unwrap_or_default();
            info!("Publishing to s3://{}/{}", bucket, prefix);
            let publisher = S3Publisher::new(Some(bucket), prefix)
                .await
                .context("S3 publisher setup")?;
            Ok(Arc::new(publisher))
        }
        None => {
            warn!("S3_BUCKET_NAME not set, publishing to in-memory store");
            Ok(Arc::new(MemoryPublisher::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tickstream_daemon=debug")),
        )
        .init();

    info!("Starting tickstream collector");

    let publisher = build_publisher().await?;

    let intervals = parse_intervals(
        &std::env::var("POLYMARKET_INTERVALS").unwrap_or_else(|_| DEFAULT_INTERVALS.to_string()),
    )?;

    let mut managers: Vec<Arc<dyn FeedManager>> = Vec::new();

    let btc = Arc::new(BtcFeedManager::new());
    btc.create(
        exchange_feeds(),
        vec![Arc::clone(&publisher)],
        Arc::new(MarketDataBuffer::new()),
    );
    managers.push(btc);

    let discovery = Arc::new(GammaClient::new());
    for interval in intervals {
        let manager = Arc::new(PolymarketFeedManager::new(interval, discovery.clone()));
        manager.create(
            vec![Arc::clone(&publisher)],
            Arc::new(MarketDataBuffer::new()),
        );
        managers.push(manager);
    }

    let mut handles = Vec::new();
    for manager in &managers {
        let manager = Arc::clone(manager);
        handles.push(tokio::spawn(async move {
            if let Err(e) = manager.run().await {
                tracing::error!("{} manager failed: {}", manager.name(), e);
            }
        }));
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown signal received, stopping managers");

    for manager in &managers {
        manager.stop().await;
    }
    for handle in handles {
        let _ = handle.await;
    }

    info!("Tickstream collector stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_separated_intervals() {
        let intervals = parse_intervals("5m, 15m,4h").unwrap();
        assert_eq!(
            intervals,
            vec![MarketInterval::M5, MarketInterval::M15, MarketInterval::H4]
        );
    }

    #[test]
    fn rejects_unknown_interval() {
        assert!(parse_intervals("5m,1h").is_err());
    }

    #[test]
    fn default_intervals_parse() {
        assert_eq!(parse_intervals(DEFAULT_INTERVALS).unwrap(), vec![MarketInterval::M5]);
    }

    #[test]
    fn builds_all_eight_feeds() {
        let feeds = exchange_feeds();
        assert_eq!(feeds.len(), 8);
        let names: Vec<&str> = feeds.iter().map(|f| f.name()).collect();
        assert!(names.contains(&"binance-btc-usd"));
        assert!(names.contains(&"chainlink-btc-usd"));
    }
}
