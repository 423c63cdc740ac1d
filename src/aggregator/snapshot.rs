//! The merged, validated market view produced by one aggregation pass

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::oracle::{BridgeHealth, ChainCongestion, ConsensusResult, LiquidationAggregate, PriceReading};
use crate::types::{Chain, DataDomain, Stablecoin};

/// Source accounting for one pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataQuality {
    pub total_sources: usize,
    pub successful_sources: usize,
    pub failed_sources: usize,
    pub anomalies_detected: usize,
    pub cache_hit_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceAlertKind {
    /// Not enough agreeing sources; products on this asset are not priced
    InsufficientConsensus,
    /// The consensus breaker tripped; the asset must not be priced this cycle
    CircuitOpen,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceAlert {
    pub asset: Stablecoin,
    pub kind: PriceAlertKind,
    pub message: String,
    /// Last accepted consensus price, if any
    pub retained_price: Option<f64>,
}

/// One raw provider reading and whether it fed the asset's consensus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingOutcome {
    pub reading: PriceReading,
    pub accepted: bool,
    /// Validation error, or why consensus left the reading out
    pub reason: Option<String>,
}

impl ReadingOutcome {
    pub fn accepted(reading: PriceReading) -> Self {
        Self {
            reading,
            accepted: true,
            reason: None,
        }
    }

    pub fn rejected(reading: PriceReading, reason: String) -> Self {
        Self {
            reading,
            accepted: false,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Content fingerprint, stable for identical content
    pub snapshot_id: String,
    /// Cycle timestamp of the pass that built this snapshot
    pub timestamp: DateTime<Utc>,
    pub prices: Vec<ConsensusResult>,
    pub bridges: Vec<BridgeHealth>,
    pub liquidations: LiquidationAggregate,
    pub congestion: Vec<ChainCongestion>,
    pub degraded_domains: Vec<DataDomain>,
    pub price_alerts: Vec<PriceAlert>,
    /// Cycle timestamp of the data per domain; older than `timestamp` when
    /// the domain was served from its own cache entry
    pub domain_as_of: Vec<(DataDomain, DateTime<Utc>)>,
    pub data_quality: DataQuality,
}

#[derive(Serialize)]
struct FingerprintContent<'a> {
    timestamp: &'a DateTime<Utc>,
    prices: &'a [ConsensusResult],
    bridges: &'a [BridgeHealth],
    liquidations: &'a LiquidationAggregate,
    congestion: &'a [ChainCongestion],
    degraded_domains: &'a [DataDomain],
}

impl MarketSnapshot {
    /// Hex sha256 prefix over the market content (data quality excluded)
    pub fn fingerprint(&self) -> String {
        let content = FingerprintContent {
            timestamp: &self.timestamp,
            prices: &self.prices,
            bridges: &self.bridges,
            liquidations: &self.liquidations,
            congestion: &self.congestion,
            degraded_domains: &self.degraded_domains,
        };
        let bytes = serde_json::to_vec(&content).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        hex::encode(&digest[..16])
    }

    pub fn price(&self, asset: Stablecoin) -> Option<&ConsensusResult> {
        self.prices.iter().find(|p| p.asset == asset)
    }

    pub fn price_alert(&self, asset: Stablecoin) -> Option<&PriceAlert> {
        self.price_alerts.iter().find(|a| a.asset == asset)
    }

    /// Mean health of all bridges reported for `chain`
    pub fn bridge_health(&self, chain: Chain) -> Option<f64> {
        let scores: Vec<f64> = self
            .bridges
            .iter()
            .filter(|b| b.chain == chain)
            .map(|b| b.health_score)
            .collect();
        if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }

    pub fn congestion(&self, chain: Chain) -> Option<f64> {
        self.congestion
            .iter()
            .find(|c| c.chain == chain)
            .map(|c| c.congestion_score)
    }

    pub fn is_degraded(&self, domain: DataDomain) -> bool {
        self.degraded_domains.contains(&domain)
    }
}
