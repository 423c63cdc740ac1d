//! Coinbase Exchange REST client for USD-quoted stablecoin tickers

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Deserialize;

use crate::error::SourceError;
use crate::oracle::sources::{JsonHttp, PriceFeed};
use crate::oracle::PriceReading;
use crate::types::Stablecoin;

const COINBASE_REST_URL: &str = "https://api.exchange.coinbase.com";
const SOURCE: &str = "coinbase";

#[derive(Debug, Clone, Deserialize)]
struct Ticker {
    bid: String,
    ask: String,
    price: String,
    time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct CoinbaseClient {
    http: JsonHttp,
    base_url: String,
}

impl CoinbaseClient {
    pub fn new(http: JsonHttp) -> Self {
        Self::with_base_url(http, COINBASE_REST_URL)
    }

    pub fn with_base_url(http: JsonHttp, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn to_reading(asset: Stablecoin, ticker: &Ticker) -> Result<PriceReading, SourceError> {
        let parse = |field: &str, raw: &str| -> Result<f64, SourceError> {
            raw.parse::<f64>()
                .map_err(|_| SourceError::invalid(SOURCE, format!("bad {} for {}", field, asset)))
        };
        let bid = parse("bid", &ticker.bid)?;
        let ask = parse("ask", &ticker.ask)?;
        let last = parse("price", &ticker.price)?;

        let mid = if bid > 0.0 && ask > 0.0 { (bid + ask) / 2.0 } else { last };
        let rel_spread = if mid > 0.0 { (ask - bid).abs() / mid } else { 1.0 };

        Ok(PriceReading {
            source: SOURCE.to_string(),
            asset,
            price: mid,
            confidence: (1.0 - rel_spread * 100.0).clamp(0.0, 1.0),
            timestamp: ticker.time.unwrap_or_else(Utc::now),
        })
    }
}

#[async_trait]
impl PriceFeed for CoinbaseClient {
    fn name(&self) -> &'static str {
        SOURCE
    }

    async fn fetch_prices(&self, assets: &[Stablecoin]) -> Result<Vec<PriceReading>, SourceError> {
        let requests = assets.iter().filter_map(move |asset| {
            asset.coinbase_product().map(move |product| async move {
                let url = format!("{}/products/{}/ticker", self.base_url, product);
                let ticker: Ticker = self.http.get_json(SOURCE, &url, &[]).await?;
                Self::to_reading(*asset, &ticker)
            })
        });

        let mut readings = Vec::new();
        let mut last_error = None;
        for result in join_all(requests).await {
            match result {
                Ok(reading) => readings.push(reading),
                Err(e) => {
                    tracing::warn!(source = SOURCE, error = %e, "Ticker request failed");
                    last_error = Some(e);
                }
            }
        }

        // Partial results are still useful; only a total failure is an error.
        match (readings.is_empty(), last_error) {
            (true, Some(e)) => Err(e),
            _ => Ok(readings),
        }
    }
}
