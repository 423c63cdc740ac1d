//! Configuration sections

use serde::Deserialize;
use std::collections::HashMap;

use crate::risk::TierBasis;

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSection {
    /// Seconds between cycles
    pub interval_secs: u64,
    /// Upper bound for one cycle in seconds
    pub cycle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsensusSection {
    pub min_sources: usize,
    /// Readings older than this are dropped
    pub staleness_secs: i64,
    pub outlier_threshold: f64,
    pub circuit_breaker_threshold: f64,
    /// Per-source weight, keyed by source name
    #[serde(default)]
    pub source_weights: HashMap<String, f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourcesSection {
    /// Stablecoin symbols to price
    pub stablecoins: Vec<String>,
    /// Chain keys to monitor
    pub chains: Vec<String>,
    /// Per-call timeout in milliseconds, retries included
    pub timeout_ms: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub binance_enabled: bool,
    pub coinbase_enabled: bool,
    pub pyth_enabled: bool,
    /// Pyth feed id per stablecoin symbol
    #[serde(default)]
    pub pyth_feed_ids: HashMap<String, String>,
    /// Bridges scored, largest by monthly volume first
    pub defillama_top_n: usize,
    /// Swap underlyings summed for liquidation stress, e.g. BTC-USDT
    pub okx_underlyings: Vec<String>,
    /// Contract value in base currency per underlying
    #[serde(default)]
    pub okx_contract_values: HashMap<String, f64>,
    pub okx_window_secs: i64,
    pub stress_elevated_usd: f64,
    pub stress_high_usd: f64,
    pub stress_extreme_usd: f64,
    /// JSON-RPC endpoint per chain key
    #[serde(default)]
    pub rpc_urls: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakerSection {
    pub failure_threshold: u32,
    pub cooldown_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationSection {
    pub min_price: f64,
    pub max_price: f64,
    pub zscore_threshold: f64,
    pub min_history_samples: usize,
    pub window_size: usize,
    pub min_stddev: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    pub snapshot_ttl_secs: i64,
    pub prices_ttl_secs: i64,
    pub bridges_ttl_secs: i64,
    pub liquidations_ttl_secs: i64,
    pub congestion_ttl_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskSection {
    pub batch_size: usize,
    /// Extreme-tier share of the catalog above which issuance halts
    pub extreme_halt_threshold: f64,
    pub tier_elevated: f64,
    pub tier_high: f64,
    pub tier_extreme: f64,
    pub tier_basis: TierBasis,
    /// YAML exploit-frequency table; the built-in table is used when unset
    #[serde(default)]
    pub exploit_table_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceSection {
    pub data_dir: String,
    pub csv_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardSection {
    pub enabled: bool,
    pub bind: String,
    pub broadcast_capacity: usize,
}
