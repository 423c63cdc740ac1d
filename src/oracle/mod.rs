//! Oracle module - Source readings and multi-feed price consensus
//!
//! Source clients for the four signal domains live in [`sources`]; the
//! [`ConsensusEngine`] turns disagreeing price readings into one robust price.

mod consensus;
pub mod sources;

pub use consensus::{ConsensusConfig, ConsensusEngine};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Chain, MarketStressLevel, Stablecoin};

/// One source's observation of one stablecoin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceReading {
    pub source: String,
    pub asset: Stablecoin,
    pub price: f64,
    /// Source-reported confidence in [0, 1]
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

/// Reconciled price for one stablecoin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub asset: Stablecoin,
    pub price: f64,
    pub confidence: f64,
    /// Standard deviation of the inlier prices
    pub deviation: f64,
    pub source_count: usize,
    pub sources: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Health of one bridge on one chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeHealth {
    pub bridge: String,
    pub chain: Chain,
    /// 1.0 = healthy, 0.0 = broken
    pub health_score: f64,
    pub daily_volume_usd: f64,
    pub timestamp: DateTime<Utc>,
}

/// Exchange liquidation activity over a trailing window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationAggregate {
    pub window_secs: i64,
    pub total_usd: f64,
    pub long_usd: f64,
    pub short_usd: f64,
    pub event_count: usize,
    pub stress_level: MarketStressLevel,
    pub timestamp: DateTime<Utc>,
}

impl LiquidationAggregate {
    /// Empty aggregate used when the liquidation domain is unavailable
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            window_secs: 0,
            total_usd: 0.0,
            long_usd: 0.0,
            short_usd: 0.0,
            event_count: 0,
            stress_level: MarketStressLevel::Normal,
            timestamp,
        }
    }
}

/// Congestion of one chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainCongestion {
    pub chain: Chain,
    /// 0.0 = idle, 1.0 = saturated
    pub congestion_score: f64,
    pub gas_used_ratio: f64,
    pub base_fee_gwei: f64,
    pub timestamp: DateTime<Utc>,
}
