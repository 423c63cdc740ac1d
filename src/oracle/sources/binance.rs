//! Binance REST client for stablecoin book tickers
//!
//! Quotes are against USDT, so USDT itself is never requested here.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use crate::error::SourceError;
use crate::oracle::sources::{JsonHttp, PriceFeed};
use crate::oracle::PriceReading;
use crate::types::Stablecoin;

const BINANCE_REST_URL: &str = "https://api.binance.com";
const SOURCE: &str = "binance";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookTicker {
    symbol: String,
    bid_price: String,
    ask_price: String,
}

#[derive(Debug, Clone)]
pub struct BinanceClient {
    http: JsonHttp,
    base_url: String,
}

impl BinanceClient {
    pub fn new(http: JsonHttp) -> Self {
        Self::with_base_url(http, BINANCE_REST_URL)
    }

    pub fn with_base_url(http: JsonHttp, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Confidence from the relative bid/ask spread: 1bp spread -> 0.99
    fn spread_confidence(bid: f64, ask: f64) -> f64 {
        let mid = (bid + ask) / 2.0;
        if mid <= 0.0 {
            return 0.0;
        }
        let rel_spread = (ask - bid).abs() / mid;
        (1.0 - rel_spread * 100.0).clamp(0.0, 1.0)
    }
}

#[async_trait]
impl PriceFeed for BinanceClient {
    fn name(&self) -> &'static str {
        SOURCE
    }

    async fn fetch_prices(&self, assets: &[Stablecoin]) -> Result<Vec<PriceReading>, SourceError> {
        let wanted: Vec<(Stablecoin, &'static str)> = assets
            .iter()
            .filter_map(|a| a.binance_symbol().map(|s| (*a, s)))
            .collect();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let symbols = serde_json::to_string(&wanted.iter().map(|(_, s)| *s).collect::<Vec<_>>())
            .map_err(|e| SourceError::invalid(SOURCE, e.to_string()))?;
        let url = format!("{}/api/v3/ticker/bookTicker", self.base_url);

        let tickers: Vec<BookTicker> = self
            .http
            .get_json(SOURCE, &url, &[("symbols", symbols)])
            .await?;

        let now = Utc::now();
        let mut readings = Vec::with_capacity(tickers.len());
        for ticker in tickers {
            let Some((asset, _)) = wanted.iter().find(|(_, s)| *s == ticker.symbol) else {
                continue;
            };
            let bid: f64 = ticker
                .bid_price
                .parse()
                .map_err(|_| SourceError::invalid(SOURCE, format!("bad bid for {}", ticker.symbol)))?;
            let ask: f64 = ticker
                .ask_price
                .parse()
                .map_err(|_| SourceError::invalid(SOURCE, format!("bad ask for {}", ticker.symbol)))?;

            readings.push(PriceReading {
                source: SOURCE.to_string(),
                asset: *asset,
                price: (bid + ask) / 2.0,
                confidence: Self::spread_confidence(bid, ask),
                timestamp: now,
            });
        }

        tracing::debug!(source = SOURCE, count = readings.len(), "Fetched book tickers");
        Ok(readings)
    }
}
