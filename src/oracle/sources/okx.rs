//! OKX public liquidation orders client
//!
//! Sums filled liquidation notional for the configured perpetual swaps over a
//! trailing window and classifies the total into a market stress level.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use futures_util::future::join_all;
use serde::Deserialize;

use crate::error::SourceError;
use crate::oracle::sources::{JsonHttp, LiquidationFeed};
use crate::oracle::LiquidationAggregate;
use crate::types::MarketStressLevel;

const OKX_REST_URL: &str = "https://www.okx.com";
const SOURCE: &str = "okx";

#[derive(Debug, Clone, Deserialize)]
struct OkxResponse {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Vec<LiquidationBucket>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiquidationBucket {
    #[serde(default)]
    details: Vec<LiquidationDetail>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiquidationDetail {
    bk_px: String,
    sz: String,
    pos_side: String,
    ts: String,
}

/// Notional (USD) boundaries between stress levels over the window
#[derive(Debug, Clone)]
pub struct StressThresholds {
    pub elevated_usd: f64,
    pub high_usd: f64,
    pub extreme_usd: f64,
}

impl Default for StressThresholds {
    fn default() -> Self {
        Self {
            elevated_usd: 20_000_000.0,
            high_usd: 50_000_000.0,
            extreme_usd: 150_000_000.0,
        }
    }
}

impl StressThresholds {
    pub fn classify(&self, total_usd: f64) -> MarketStressLevel {
        if total_usd >= self.extreme_usd {
            MarketStressLevel::Extreme
        } else if total_usd >= self.high_usd {
            MarketStressLevel::High
        } else if total_usd >= self.elevated_usd {
            MarketStressLevel::Elevated
        } else {
            MarketStressLevel::Normal
        }
    }
}

#[derive(Debug, Clone)]
pub struct OkxLiquidationClient {
    http: JsonHttp,
    base_url: String,
    /// (underlying, contract value in base currency), e.g. ("BTC-USDT", 0.01)
    instruments: Vec<(String, f64)>,
    window: Duration,
    thresholds: StressThresholds,
}

#[derive(Debug, Default, Clone, Copy)]
struct Totals {
    long_usd: f64,
    short_usd: f64,
    events: usize,
}

impl OkxLiquidationClient {
    pub fn new(
        http: JsonHttp,
        instruments: Vec<(String, f64)>,
        window: Duration,
        thresholds: StressThresholds,
    ) -> Self {
        Self::with_base_url(http, OKX_REST_URL, instruments, window, thresholds)
    }

    pub fn with_base_url(
        http: JsonHttp,
        base_url: &str,
        instruments: Vec<(String, f64)>,
        window: Duration,
        thresholds: StressThresholds,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            instruments,
            window,
            thresholds,
        }
    }

    fn sum_details(
        details: &[LiquidationDetail],
        contract_value: f64,
        since_ms: i64,
    ) -> Result<Totals, SourceError> {
        let mut totals = Totals::default();
        for detail in details {
            let ts: i64 = detail
                .ts
                .parse()
                .map_err(|_| SourceError::invalid(SOURCE, "bad liquidation ts"))?;
            if ts < since_ms {
                continue;
            }
            let px: f64 = detail
                .bk_px
                .parse()
                .map_err(|_| SourceError::invalid(SOURCE, "bad bkPx"))?;
            let sz: f64 = detail
                .sz
                .parse()
                .map_err(|_| SourceError::invalid(SOURCE, "bad sz"))?;
            let notional = px * sz * contract_value;
            match detail.pos_side.as_str() {
                "short" => totals.short_usd += notional,
                _ => totals.long_usd += notional,
            }
            totals.events += 1;
        }
        Ok(totals)
    }

    async fn fetch_underlying(&self, uly: &str, contract_value: f64, since_ms: i64) -> Result<Totals, SourceError> {
        let url = format!("{}/api/v5/public/liquidation-orders", self.base_url);
        let query = [
            ("instType", "SWAP".to_string()),
            ("uly", uly.to_string()),
            ("state", "filled".to_string()),
            ("limit", "100".to_string()),
        ];
        let response: OkxResponse = self.http.get_json(SOURCE, &url, &query).await?;
        if response.code != "0" {
            return Err(SourceError::invalid(
                SOURCE,
                format!("code {} for {}: {}", response.code, uly, response.msg),
            ));
        }

        let mut totals = Totals::default();
        for bucket in &response.data {
            let part = Self::sum_details(&bucket.details, contract_value, since_ms)?;
            totals.long_usd += part.long_usd;
            totals.short_usd += part.short_usd;
            totals.events += part.events;
        }
        Ok(totals)
    }
}

#[async_trait]
impl LiquidationFeed for OkxLiquidationClient {
    fn name(&self) -> &'static str {
        SOURCE
    }

    async fn fetch_liquidations(&self) -> Result<LiquidationAggregate, SourceError> {
        let now = Utc::now();
        let since_ms = (now - self.window).timestamp_millis();

        let results = join_all(
            self.instruments
                .iter()
                .map(|(uly, ct_val)| self.fetch_underlying(uly, *ct_val, since_ms)),
        )
        .await;

        let mut totals = Totals::default();
        let mut succeeded = 0usize;
        let mut last_error = None;
        for result in results {
            match result {
                Ok(part) => {
                    totals.long_usd += part.long_usd;
                    totals.short_usd += part.short_usd;
                    totals.events += part.events;
                    succeeded += 1;
                }
                Err(e) => last_error = Some(e),
            }
        }

        // A partial sum would understate stress, so any failure fails the domain.
        if let Some(e) = last_error {
            tracing::warn!(source = SOURCE, succeeded, error = %e, "Liquidation fetch incomplete");
            return Err(e);
        }

        let total_usd = totals.long_usd + totals.short_usd;
        Ok(LiquidationAggregate {
            window_secs: self.window.num_seconds(),
            total_usd,
            long_usd: totals.long_usd,
            short_usd: totals.short_usd,
            event_count: totals.events,
            stress_level: self.thresholds.classify(total_usd),
            timestamp: now,
        })
    }
}
