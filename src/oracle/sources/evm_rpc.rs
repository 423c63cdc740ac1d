//! EVM JSON-RPC congestion client
//!
//! Uses `eth_feeHistory` over the last blocks: block fullness (gasUsedRatio)
//! dominates the score, base fee growth across the window adds pressure.

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

use crate::error::SourceError;
use crate::oracle::sources::{CongestionFeed, JsonHttp};
use crate::oracle::ChainCongestion;
use crate::types::Chain;

const SOURCE: &str = "evm_rpc";
const FEE_HISTORY_BLOCKS: u32 = 20;
const FULLNESS_WEIGHT: f64 = 0.7;
const TREND_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, Deserialize)]
struct RpcResponse {
    result: Option<FeeHistory>,
    error: Option<RpcError>,
}

#[derive(Debug, Clone, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeeHistory {
    base_fee_per_gas: Vec<String>,
    gas_used_ratio: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct EvmCongestionClient {
    http: JsonHttp,
    rpc_urls: HashMap<Chain, String>,
}

fn parse_hex_u128(raw: &str) -> Option<u128> {
    u128::from_str_radix(raw.trim_start_matches("0x"), 16).ok()
}

impl EvmCongestionClient {
    pub fn new(http: JsonHttp, rpc_urls: HashMap<Chain, String>) -> Self {
        Self { http, rpc_urls }
    }

    /// Congestion in [0, 1] from a fee history window
    fn score(history: &FeeHistory) -> Option<(f64, f64, f64)> {
        if history.gas_used_ratio.is_empty() {
            return None;
        }
        let fullness = history.gas_used_ratio.iter().sum::<f64>() / history.gas_used_ratio.len() as f64;

        let fees: Vec<u128> = history
            .base_fee_per_gas
            .iter()
            .filter_map(|f| parse_hex_u128(f))
            .collect();
        let first = *fees.first()? as f64;
        let last = *fees.last()? as f64;
        let trend = if first > 0.0 {
            (last / first - 1.0).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let score = (FULLNESS_WEIGHT * fullness + TREND_WEIGHT * trend).clamp(0.0, 1.0);
        Some((score, fullness, last / 1e9))
    }

    async fn fetch_chain(&self, chain: Chain, url: &str) -> Result<ChainCongestion, SourceError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_feeHistory",
            "params": [format!("0x{:x}", FEE_HISTORY_BLOCKS), "latest", []],
        });
        let response: RpcResponse = self.http.post_json(SOURCE, url, &body).await?;

        if let Some(err) = response.error {
            return Err(SourceError::invalid(
                SOURCE,
                format!("{} rpc error {}: {}", chain, err.code, err.message),
            ));
        }
        let history = response
            .result
            .ok_or_else(|| SourceError::invalid(SOURCE, format!("{} empty fee history", chain)))?;
        let (score, fullness, base_fee_gwei) = Self::score(&history)
            .ok_or_else(|| SourceError::invalid(SOURCE, format!("{} unusable fee history", chain)))?;

        Ok(ChainCongestion {
            chain,
            congestion_score: score,
            gas_used_ratio: fullness,
            base_fee_gwei,
            timestamp: Utc::now(),
        })
    }
}

#[async_trait]
impl CongestionFeed for EvmCongestionClient {
    fn name(&self) -> &'static str {
        SOURCE
    }

    async fn fetch_congestion(&self, chains: &[Chain]) -> Result<Vec<ChainCongestion>, SourceError> {
        let requests = chains.iter().filter_map(|chain| {
            self.rpc_urls
                .get(chain)
                .map(|url| self.fetch_chain(*chain, url.as_str()))
        });

        let mut readings = Vec::new();
        let mut last_error = None;
        for result in join_all(requests).await {
            match result {
                Ok(reading) => readings.push(reading),
                Err(e) => {
                    tracing::warn!(source = SOURCE, error = %e, "Chain congestion read failed");
                    last_error = Some(e);
                }
            }
        }

        match (readings.is_empty(), last_error) {
            (true, Some(e)) => Err(e),
            _ => Ok(readings),
        }
    }
}
