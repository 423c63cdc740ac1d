//! DeFiLlama bridges client
//!
//! Bridge health is derived from flow stability: the last day's volume is
//! compared with the trailing weekly average. A bridge whose flow collapses or
//! spikes (drains show up as a one-sided surge) loses health symmetrically in
//! log space; a 4x move either way scores 0.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use crate::error::SourceError;
use crate::oracle::sources::{BridgeHealthFeed, JsonHttp};
use crate::oracle::BridgeHealth;
use crate::types::Chain;

const BRIDGES_URL: &str = "https://bridges.llama.fi";
const SOURCE: &str = "defillama";
const ZERO_HEALTH_RATIO: f64 = 4.0;

#[derive(Debug, Clone, Deserialize)]
struct BridgesResponse {
    bridges: Vec<BridgeSummary>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BridgeSummary {
    display_name: String,
    #[serde(default)]
    last_daily_volume: Option<f64>,
    #[serde(default)]
    weekly_volume: Option<f64>,
    #[serde(default)]
    monthly_volume: Option<f64>,
    #[serde(default)]
    chains: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DefiLlamaBridgeClient {
    http: JsonHttp,
    base_url: String,
    /// Only the largest bridges by monthly volume are scored
    top_n: usize,
}

impl DefiLlamaBridgeClient {
    pub fn new(http: JsonHttp, top_n: usize) -> Self {
        Self::with_base_url(http, BRIDGES_URL, top_n)
    }

    pub fn with_base_url(http: JsonHttp, base_url: &str, top_n: usize) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            top_n,
        }
    }

    /// Health in [0, 1] from the daily/weekly-average volume ratio
    pub fn flow_health(last_daily: f64, weekly: f64) -> Option<f64> {
        let baseline = weekly / 7.0;
        if !baseline.is_finite() || baseline <= 0.0 || !last_daily.is_finite() || last_daily < 0.0 {
            return None;
        }
        let ratio = last_daily / baseline;
        let penalty = ratio.ln().abs() / ZERO_HEALTH_RATIO.ln();
        Some((1.0 - penalty).clamp(0.0, 1.0))
    }

    fn score(&self, bridges: Vec<BridgeSummary>, chains: &[Chain]) -> Vec<BridgeHealth> {
        let mut bridges = bridges;
        bridges.sort_by(|a, b| {
            b.monthly_volume
                .unwrap_or(0.0)
                .total_cmp(&a.monthly_volume.unwrap_or(0.0))
        });

        let now = Utc::now();
        let mut out = Vec::new();
        for bridge in bridges.into_iter().take(self.top_n) {
            let (Some(daily), Some(weekly)) = (bridge.last_daily_volume, bridge.weekly_volume) else {
                continue;
            };
            let Some(health) = Self::flow_health(daily, weekly) else {
                continue;
            };
            for label in &bridge.chains {
                let Some(chain) = Chain::from_str(label) else {
                    continue;
                };
                if !chains.contains(&chain) {
                    continue;
                }
                out.push(BridgeHealth {
                    bridge: bridge.display_name.clone(),
                    chain,
                    health_score: health,
                    daily_volume_usd: daily,
                    timestamp: now,
                });
            }
        }
        out
    }
}

#[async_trait]
impl BridgeHealthFeed for DefiLlamaBridgeClient {
    fn name(&self) -> &'static str {
        SOURCE
    }

    async fn fetch_bridge_health(&self, chains: &[Chain]) -> Result<Vec<BridgeHealth>, SourceError> {
        let url = format!("{}/bridges", self.base_url);
        let response: BridgesResponse = self
            .http
            .get_json(SOURCE, &url, &[("includeChains", "true".to_string())])
            .await?;

        let scored = self.score(response.bridges, chains);
        tracing::debug!(source = SOURCE, count = scored.len(), "Scored bridge health");
        Ok(scored)
    }
}
