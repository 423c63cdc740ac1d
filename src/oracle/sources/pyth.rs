//! Pyth Hermes REST client
//!
//! Reads the latest parsed price updates for configured feed ids. Pyth
//! publishes a confidence interval with each price; it is mapped onto [0, 1].

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use std::collections::HashMap;

use crate::error::SourceError;
use crate::oracle::sources::{JsonHttp, PriceFeed};
use crate::oracle::PriceReading;
use crate::types::Stablecoin;

const HERMES_URL: &str = "https://hermes.pyth.network";
const SOURCE: &str = "pyth";

#[derive(Debug, Clone, Deserialize)]
struct LatestUpdates {
    parsed: Vec<ParsedUpdate>,
}

#[derive(Debug, Clone, Deserialize)]
struct ParsedUpdate {
    id: String,
    price: PythPrice,
}

#[derive(Debug, Clone, Deserialize)]
struct PythPrice {
    price: String,
    conf: String,
    expo: i32,
    publish_time: i64,
}

#[derive(Debug, Clone)]
pub struct PythClient {
    http: JsonHttp,
    base_url: String,
    /// Feed id (hex, with or without 0x) per stablecoin
    feed_ids: HashMap<Stablecoin, String>,
}

impl PythClient {
    pub fn new(http: JsonHttp, feed_ids: HashMap<Stablecoin, String>) -> Self {
        Self::with_base_url(http, HERMES_URL, feed_ids)
    }

    pub fn with_base_url(
        http: JsonHttp,
        base_url: &str,
        feed_ids: HashMap<Stablecoin, String>,
    ) -> Self {
        let feed_ids = feed_ids
            .into_iter()
            .map(|(asset, id)| (asset, normalize_id(&id)))
            .collect();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            feed_ids,
        }
    }

    fn to_reading(asset: Stablecoin, price: &PythPrice) -> Result<PriceReading, SourceError> {
        let raw: f64 = price
            .price
            .parse()
            .map_err(|_| SourceError::invalid(SOURCE, format!("bad price for {}", asset)))?;
        let conf: f64 = price
            .conf
            .parse()
            .map_err(|_| SourceError::invalid(SOURCE, format!("bad conf for {}", asset)))?;
        let scale = 10f64.powi(price.expo);
        let value = raw * scale;
        let interval = conf * scale;

        let timestamp = Utc
            .timestamp_opt(price.publish_time, 0)
            .single()
            .ok_or_else(|| SourceError::invalid(SOURCE, "bad publish_time"))?;

        let confidence = if value > 0.0 {
            (1.0 - (interval / value) * 100.0).clamp(0.0, 1.0)
        } else {
            0.0
        };

        Ok(PriceReading {
            source: SOURCE.to_string(),
            asset,
            price: value,
            confidence,
            timestamp,
        })
    }
}

fn normalize_id(id: &str) -> String {
    id.trim().trim_start_matches("0x").to_lowercase()
}

#[async_trait]
impl PriceFeed for PythClient {
    fn name(&self) -> &'static str {
        SOURCE
    }

    async fn fetch_prices(&self, assets: &[Stablecoin]) -> Result<Vec<PriceReading>, SourceError> {
        let wanted: Vec<(Stablecoin, &String)> = assets
            .iter()
            .filter_map(|a| self.feed_ids.get(a).map(|id| (*a, id)))
            .collect();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let mut query: Vec<(&str, String)> = wanted
            .iter()
            .map(|(_, id)| ("ids[]", format!("0x{}", id)))
            .collect();
        query.push(("parsed", "true".to_string()));

        let url = format!("{}/v2/updates/price/latest", self.base_url);
        let updates: LatestUpdates = self.http.get_json(SOURCE, &url, &query).await?;

        let mut readings = Vec::with_capacity(updates.parsed.len());
        for update in &updates.parsed {
            let id = normalize_id(&update.id);
            if let Some((asset, _)) = wanted.iter().find(|(_, wanted_id)| **wanted_id == id) {
                readings.push(Self::to_reading(*asset, &update.price)?);
            }
        }
        Ok(readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsed_update_scaled_by_exponent() {
        let body = r#"{
            "binary": {"encoding": "hex", "data": []},
            "parsed": [{
                "id": "eaa020c61cc479712813461ce153894a96a6c00b21ed0cfc2798d1f9a9e9c94a",
                "price": {"price": "99995000", "conf": "80000", "expo": -8, "publish_time": 1714564800},
                "ema_price": {"price": "99990000", "conf": "90000", "expo": -8, "publish_time": 1714564800}
            }]
        }"#;
        let updates: LatestUpdates = serde_json::from_str(body).unwrap();
        let reading = PythClient::to_reading(Stablecoin::USDC, &updates.parsed[0].price).unwrap();

        assert!((reading.price - 0.99995).abs() < 1e-12);
        // 0.0008 / 0.99995 relative interval
        assert!((reading.confidence - (1.0 - 0.0008 / 0.99995 * 100.0)).abs() < 1e-9);
        assert_eq!(reading.timestamp.timestamp(), 1714564800);
    }

    #[test]
    fn test_feed_ids_normalized() {
        assert_eq!(normalize_id(" 0xABCD "), "abcd");
        assert_eq!(normalize_id("abcd"), "abcd");
    }
}
