//! Market-data feed candidate source.
//!
//! The feed is a JSON array with one row per perpetual, published over HTTP
//! or dropped as a local file. Rows are cached for `cache_secs` so that a
//! controller refresh and many worker metric lookups share one download.

use super::{CandidateFilter, CandidateSource, Signal, SymbolMetrics};
use crate::config::{ApiConfig, FeedMode};
use crate::exchange::Symbol;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// One feed row.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedRow {
    #[serde(rename = "Asset")]
    pub asset: String,
    #[serde(rename = "Price", default)]
    pub price: Decimal,
    #[serde(rename = "Min qty", default)]
    pub min_qty: Decimal,
    #[serde(rename = "1mVol", default)]
    pub volume_1m: Decimal,
    #[serde(rename = "5mVol", default)]
    pub volume_5m: Decimal,
    #[serde(rename = "5mSpread", default)]
    pub spread_5m: Decimal,
    #[serde(rename = "Trend", default)]
    pub trend: Signal,
    #[serde(rename = "MFI", default)]
    pub mfi: Signal,
    #[serde(rename = "ERI Trend", default)]
    pub eri_trend: Signal,
}

impl FeedRow {
    fn metrics(&self) -> SymbolMetrics {
        SymbolMetrics {
            symbol: Symbol::new(&self.asset),
            price: self.price,
            min_qty: self.min_qty,
            volume_1m: self.volume_1m,
            volume_5m: self.volume_5m,
            spread_5m: self.spread_5m,
            trend: self.trend,
            mfi: self.mfi,
            eri_trend: self.eri_trend,
        }
    }
}

enum FeedLocation {
    Remote(String),
    Local(String),
}

/// Candidate source backed by the market-data feed.
pub struct FeedCandidateSource {
    http: Client,
    location: FeedLocation,
    cache_ttl: Duration,
    cache: Mutex<Option<(Instant, Arc<Vec<SymbolMetrics>>)>>,
}

impl FeedCandidateSource {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let location = match config.mode {
            FeedMode::Remote => FeedLocation::Remote(config.url.clone()),
            FeedMode::Local => FeedLocation::Local(config.filename.clone()),
        };

        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            location,
            cache_ttl: Duration::from_secs(config.cache_secs),
            cache: Mutex::new(None),
        })
    }

    async fn fetch_rows(&self) -> Result<Vec<FeedRow>> {
        match &self.location {
            FeedLocation::Remote(url) => {
                let response = self
                    .http
                    .get(url)
                    .send()
                    .await
                    .with_context(|| format!("Failed to fetch feed from {}", url))?;

                let status = response.status();
                anyhow::ensure!(status.is_success(), "Feed {} returned {}", url, status);

                response.json().await.context("Failed to parse feed")
            }
            FeedLocation::Local(path) => {
                let raw = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read feed file {}", path))?;
                serde_json::from_str(&raw).context("Failed to parse feed file")
            }
        }
    }

    /// Current feed contents, normalized and sorted by 1m volume.
    async fn snapshot(&self) -> Result<Arc<Vec<SymbolMetrics>>> {
        let mut cache = self.cache.lock().await;
        if let Some((fetched_at, rows)) = cache.as_ref() {
            if fetched_at.elapsed() < self.cache_ttl {
                return Ok(Arc::clone(rows));
            }
        }

        let rows = self.fetch_rows().await?;
        let mut metrics: Vec<SymbolMetrics> = rows
            .iter()
            .map(FeedRow::metrics)
            .filter(|m| {
                if m.symbol.is_empty() {
                    warn!("Feed row without asset, skipping");
                    return false;
                }
                true
            })
            .collect();
        metrics.sort_by_key(|m| Reverse(m.volume_1m));

        debug!(rows = metrics.len(), "Feed refreshed");
        let metrics = Arc::new(metrics);
        *cache = Some((Instant::now(), Arc::clone(&metrics)));
        Ok(metrics)
    }
}

#[async_trait]
impl CandidateSource for FeedCandidateSource {
    #[instrument(skip(self))]
    async fn get_candidate_symbols(&self, filter: &CandidateFilter) -> Result<Vec<Symbol>> {
        let snapshot = self.snapshot().await?;

        Ok(snapshot
            .iter()
            .filter(|m| filter.permits(&m.symbol))
            .filter(|m| filter.max_value.map_or(true, |max| m.min_qty * m.price <= max))
            .filter(|m| filter.bias.admits(m.mfi))
            .map(|m| m.symbol.clone())
            .collect())
    }

    async fn get_metrics(&self, symbol: &Symbol) -> Result<Option<SymbolMetrics>> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot.iter().find(|m| &m.symbol == symbol).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::Bias;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn feed_body() -> serde_json::Value {
        json!([
            {"Asset": "ETH/USDT:USDT", "Price": 3000.5, "Min qty": 0.01, "1mVol": 8000,
             "5mVol": 40000, "5mSpread": 0.4, "Trend": "long", "MFI": "long", "ERI Trend": "bullish"},
            {"Asset": "BTCUSDT", "Price": 60000, "Min qty": 0.001, "1mVol": 20000,
             "5mVol": 90000, "5mSpread": 0.2, "Trend": "short", "MFI": "short", "ERI Trend": "bearish"},
            {"Asset": "PEPEUSDT", "Price": 0.00001, "Min qty": 100, "1mVol": 15000,
             "5mVol": 70000, "5mSpread": 0.9, "Trend": "long", "MFI": "long", "ERI Trend": ""}
        ])
    }

    fn remote_config(url: String) -> ApiConfig {
        ApiConfig {
            mode: FeedMode::Remote,
            url,
            filename: String::new(),
            cache_secs: 60,
        }
    }

    #[tokio::test]
    async fn test_remote_feed_sorted_and_filtered() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(feed_body()))
            .expect(1)
            .mount(&server)
            .await;

        let source = FeedCandidateSource::new(&remote_config(format!("{}/feed.json", server.uri()))).unwrap();

        let all = source.get_candidate_symbols(&CandidateFilter::default()).await.unwrap();
        assert_eq!(
            all,
            vec![Symbol::new("BTCUSDT"), Symbol::new("PEPEUSDT"), Symbol::new("ETHUSDT")]
        );

        // Second call is served from cache (expect(1) above)
        let filter = CandidateFilter {
            deny: vec![Symbol::new("PEPEUSDT")],
            max_value: Some(dec!(50)),
            bias: Bias::Bullish,
            ..Default::default()
        };
        let bullish = source.get_candidate_symbols(&filter).await.unwrap();
        assert_eq!(bullish, vec![Symbol::new("ETHUSDT")]);
    }

    #[tokio::test]
    async fn test_feed_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let source = FeedCandidateSource::new(&remote_config(server.uri())).unwrap();
        assert!(source.get_candidate_symbols(&CandidateFilter::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_local_feed_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("feed.json");
        std::fs::write(&file, feed_body().to_string()).unwrap();

        let source = FeedCandidateSource::new(&ApiConfig {
            mode: FeedMode::Local,
            url: String::new(),
            filename: file.to_string_lossy().into_owned(),
            cache_secs: 0,
        })
        .unwrap();

        let metrics = source.get_metrics(&Symbol::new("ETHUSDT")).await.unwrap().unwrap();
        assert_eq!(metrics.price, dec!(3000.5));
        assert_eq!(metrics.mfi, Signal::Long);
        assert_eq!(metrics.eri_trend, Signal::Long);

        assert!(source.get_metrics(&Symbol::new("XRPUSDT")).await.unwrap().is_none());
    }
}
