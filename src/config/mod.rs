//! Configuration management for RiskOracle
//!
//! Loads from YAML files + environment variables via .env

mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use chrono::Duration;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::aggregator::{AggregatorConfig, DomainTtls, ValidationConfig};
use crate::circuit_breaker::BreakerConfig;
use crate::monitor::MonitorConfig;
use crate::oracle::sources::StressThresholds;
use crate::oracle::ConsensusConfig;
use crate::retry::RetryPolicy;
use crate::risk::{ExploitTable, RiskConfig, TierThresholds};
use crate::types::{Chain, Stablecoin};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub monitor: MonitorSection,
    pub consensus: ConsensusSection,
    pub sources: SourcesSection,
    pub breaker: BreakerSection,
    pub validation: ValidationSection,
    pub cache: CacheSection,
    pub risk: RiskSection,
    pub persistence: PersistenceSection,
    pub dashboard: DashboardSection,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Self::defaults()?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (RISKORACLE__SECTION__KEY)
            .add_source(
                Environment::with_prefix("RISKORACLE")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("sources.stablecoins")
                    .with_list_parse_key("sources.chains")
                    .with_list_parse_key("sources.okx_underlyings")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        Self::finish(config)
    }

    /// Defaults overlaid with one YAML document
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config = Self::defaults()?
            .add_source(File::from_str(raw, FileFormat::Yaml))
            .build()
            .context("Failed to build configuration")?;
        Self::finish(config)
    }

    fn finish(config: Config) -> Result<Self> {
        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>> {
        let builder = Config::builder()
            // Monitor defaults
            .set_default("monitor.interval_secs", 30)?
            .set_default("monitor.cycle_timeout_secs", 60)?
            // Consensus defaults
            .set_default("consensus.min_sources", 2)?
            .set_default("consensus.staleness_secs", 60)?
            .set_default("consensus.outlier_threshold", 0.02)?
            .set_default("consensus.circuit_breaker_threshold", 0.05)?
            // Source defaults
            .set_default(
                "sources.stablecoins",
                Stablecoin::ALL.iter().map(|s| s.symbol()).collect::<Vec<_>>(),
            )?
            .set_default(
                "sources.chains",
                Chain::ALL.iter().map(|c| c.key()).collect::<Vec<_>>(),
            )?
            .set_default("sources.timeout_ms", 10_000)?
            .set_default("sources.retry_max_attempts", 3)?
            .set_default("sources.retry_base_delay_ms", 250)?
            .set_default("sources.retry_max_delay_ms", 2_000)?
            .set_default("sources.binance_enabled", true)?
            .set_default("sources.coinbase_enabled", true)?
            .set_default("sources.pyth_enabled", true)?
            .set_default("sources.defillama_top_n", 20)?
            .set_default("sources.okx_underlyings", vec!["BTC-USDT", "ETH-USDT"])?
            .set_default("sources.okx_window_secs", 3600)?
            .set_default("sources.stress_elevated_usd", 20_000_000.0)?
            .set_default("sources.stress_high_usd", 50_000_000.0)?
            .set_default("sources.stress_extreme_usd", 150_000_000.0)?
            // Breaker defaults
            .set_default("breaker.failure_threshold", 3)?
            .set_default("breaker.cooldown_secs", 60)?
            // Validation defaults
            .set_default("validation.min_price", 0.70)?
            .set_default("validation.max_price", 1.30)?
            .set_default("validation.zscore_threshold", 4.0)?
            .set_default("validation.min_history_samples", 10)?
            .set_default("validation.window_size", 100)?
            .set_default("validation.min_stddev", 0.005)?
            // Cache defaults
            .set_default("cache.snapshot_ttl_secs", 30)?
            .set_default("cache.prices_ttl_secs", 30)?
            .set_default("cache.bridges_ttl_secs", 60)?
            .set_default("cache.liquidations_ttl_secs", 30)?
            .set_default("cache.congestion_ttl_secs", 30)?
            // Risk defaults
            .set_default("risk.batch_size", 50)?
            .set_default("risk.extreme_halt_threshold", 0.10)?
            .set_default("risk.tier_elevated", 1.2)?
            .set_default("risk.tier_high", 1.5)?
            .set_default("risk.tier_extreme", 2.0)?
            .set_default("risk.tier_basis", "final_multiplier")?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.csv_enabled", true)?
            // Dashboard defaults
            .set_default("dashboard.enabled", false)?
            .set_default("dashboard.bind", "0.0.0.0:3001")?
            .set_default("dashboard.broadcast_capacity", 64)?;
        Ok(builder)
    }

    /// Reject settings that would make a component misbehave silently
    pub fn validate(&self) -> Result<()> {
        if self.monitor.interval_secs == 0 {
            bail!("monitor.interval_secs must be positive");
        }
        if self.consensus.min_sources == 0 {
            bail!("consensus.min_sources must be at least 1");
        }
        if self.validation.min_price >= self.validation.max_price {
            bail!(
                "validation.min_price ({}) must be below validation.max_price ({})",
                self.validation.min_price,
                self.validation.max_price
            );
        }
        let r = &self.risk;
        if !(r.tier_elevated < r.tier_high && r.tier_high < r.tier_extreme) {
            bail!(
                "risk tiers must increase: elevated={} high={} extreme={}",
                r.tier_elevated,
                r.tier_high,
                r.tier_extreme
            );
        }
        if !(0.0..=1.0).contains(&r.extreme_halt_threshold) {
            bail!("risk.extreme_halt_threshold must be within [0, 1]");
        }
        let s = &self.sources;
        if !(s.binance_enabled || s.coinbase_enabled || s.pyth_enabled) {
            bail!("at least one price source must be enabled");
        }
        if !(s.stress_elevated_usd < s.stress_high_usd && s.stress_high_usd < s.stress_extreme_usd) {
            bail!("sources.stress_* thresholds must increase");
        }
        self.stablecoins()?;
        self.chains()?;
        Ok(())
    }

    pub fn stablecoins(&self) -> Result<Vec<Stablecoin>> {
        self.sources
            .stablecoins
            .iter()
            .map(|s| Stablecoin::from_str(s).with_context(|| format!("Unknown stablecoin: {}", s)))
            .collect()
    }

    pub fn chains(&self) -> Result<Vec<Chain>> {
        self.sources
            .chains
            .iter()
            .map(|c| Chain::from_str(c).with_context(|| format!("Unknown chain: {}", c)))
            .collect()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.sources.retry_max_attempts.max(1),
            base_delay: std::time::Duration::from_millis(self.sources.retry_base_delay_ms),
            max_delay: std::time::Duration::from_millis(self.sources.retry_max_delay_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn source_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sources.timeout_ms)
    }

    pub fn consensus_config(&self) -> ConsensusConfig {
        ConsensusConfig {
            min_sources: self.consensus.min_sources,
            staleness_threshold: Duration::seconds(self.consensus.staleness_secs),
            outlier_threshold: self.consensus.outlier_threshold,
            circuit_breaker_threshold: self.consensus.circuit_breaker_threshold,
            source_weights: self.consensus.source_weights.clone(),
        }
    }

    pub fn aggregator_config(&self) -> Result<AggregatorConfig> {
        Ok(AggregatorConfig {
            stablecoins: self.stablecoins()?,
            chains: self.chains()?,
            snapshot_ttl: Duration::seconds(self.cache.snapshot_ttl_secs),
            domain_ttls: DomainTtls {
                prices: Duration::seconds(self.cache.prices_ttl_secs),
                bridges: Duration::seconds(self.cache.bridges_ttl_secs),
                liquidations: Duration::seconds(self.cache.liquidations_ttl_secs),
                congestion: Duration::seconds(self.cache.congestion_ttl_secs),
            },
            source_timeout: self.source_timeout(),
            breaker: BreakerConfig {
                failure_threshold: self.breaker.failure_threshold,
                cooldown: Duration::seconds(self.breaker.cooldown_secs),
            },
            validation: ValidationConfig {
                min_price: self.validation.min_price,
                max_price: self.validation.max_price,
                zscore_threshold: self.validation.zscore_threshold,
                min_history_samples: self.validation.min_history_samples,
                window_size: self.validation.window_size,
                min_stddev: self.validation.min_stddev,
            },
            consensus: self.consensus_config(),
        })
    }

    pub fn risk_config(&self) -> RiskConfig {
        RiskConfig {
            batch_size: self.risk.batch_size,
            extreme_halt_threshold: self.risk.extreme_halt_threshold,
            tiers: TierThresholds {
                elevated: self.risk.tier_elevated,
                high: self.risk.tier_high,
                extreme: self.risk.tier_extreme,
            },
            tier_basis: self.risk.tier_basis,
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            interval: std::time::Duration::from_secs(self.monitor.interval_secs),
            cycle_timeout: std::time::Duration::from_secs(self.monitor.cycle_timeout_secs),
        }
    }

    /// Configured exploit table, or the built-in one
    pub fn exploit_table(&self) -> Result<ExploitTable> {
        match &self.risk.exploit_table_path {
            Some(path) => ExploitTable::load(Path::new(path)),
            None => Ok(ExploitTable::builtin()),
        }
    }

    pub fn pyth_feed_ids(&self) -> Result<HashMap<Stablecoin, String>> {
        self.sources
            .pyth_feed_ids
            .iter()
            .map(|(symbol, id)| {
                let asset = Stablecoin::from_str(symbol)
                    .with_context(|| format!("Unknown stablecoin in pyth_feed_ids: {}", symbol))?;
                Ok((asset, id.clone()))
            })
            .collect()
    }

    pub fn rpc_urls(&self) -> Result<HashMap<Chain, String>> {
        self.sources
            .rpc_urls
            .iter()
            .map(|(key, url)| {
                let chain = Chain::from_str(key)
                    .with_context(|| format!("Unknown chain in rpc_urls: {}", key))?;
                Ok((chain, url.clone()))
            })
            .collect()
    }

    /// `(underlying, contract value)` pairs; map keys may arrive lowercased
    pub fn okx_instruments(&self) -> Vec<(String, f64)> {
        let values: HashMap<String, f64> = self
            .sources
            .okx_contract_values
            .iter()
            .map(|(k, v)| (k.to_uppercase(), *v))
            .collect();
        self.sources
            .okx_underlyings
            .iter()
            .map(|uly| {
                let uly = uly.to_uppercase();
                let value = values
                    .get(&uly)
                    .copied()
                    .unwrap_or_else(|| default_contract_value(&uly));
                (uly, value)
            })
            .collect()
    }

    pub fn stress_thresholds(&self) -> StressThresholds {
        StressThresholds {
            elevated_usd: self.sources.stress_elevated_usd,
            high_usd: self.sources.stress_high_usd,
            extreme_usd: self.sources.stress_extreme_usd,
        }
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "interval={}s stablecoins={:?} chains={:?} min_sources={} cb={:.2} halt={:.2} basis={:?} data_dir={}",
            self.monitor.interval_secs,
            self.sources.stablecoins,
            self.sources.chains,
            self.consensus.min_sources,
            self.consensus.circuit_breaker_threshold,
            self.risk.extreme_halt_threshold,
            self.risk.tier_basis,
            self.persistence.data_dir
        )
    }
}

/// OKX linear swap contract sizes for the usual underlyings
fn default_contract_value(uly: &str) -> f64 {
    match uly {
        "BTC-USDT" | "BTC-USD" => 0.01,
        "ETH-USDT" | "ETH-USD" => 0.1,
        _ => 1.0,
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
