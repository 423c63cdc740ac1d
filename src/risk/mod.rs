//! Risk Score Calculator - per-product risk multipliers
//!
//! For every product in the catalog:
//! - base rate of the coverage type
//! - depeg factor from the stablecoin's consensus price
//! - bridge health and congestion factors for the chain
//! - exploit-frequency factor from the exploit table
//! - liquidation stress factor from the market stress level
//!
//! `final_multiplier` is the product of all six. Products are computed in
//! fixed-size concurrent batches, then summarized for the fleet and checked
//! against the business circuit breaker.

mod exploit_table;
pub mod factors;

pub use exploit_table::ExploitTable;
pub use factors::TierThresholds;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::aggregator::{MarketSnapshot, PriceAlertKind};
use crate::types::{DataDomain, ProductCatalog, ProductKey, RiskTier};

/// Which value the tier thresholds are compared against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierBasis {
    /// The full multiplier, base rate included
    FinalMultiplier,
    /// The product of the five risk factors, base rate excluded
    RiskFactors,
}

#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Products computed concurrently per batch
    pub batch_size: usize,
    /// Share of Extreme-tier products above which issuance halts
    pub extreme_halt_threshold: f64,
    pub tiers: TierThresholds,
    pub tier_basis: TierBasis,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            extreme_halt_threshold: 0.10,
            tiers: TierThresholds::default(),
            tier_basis: TierBasis::FinalMultiplier,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMultiplierBreakdown {
    pub product: ProductKey,
    pub base_rate: f64,
    pub price_depeg_factor: f64,
    pub bridge_health_factor: f64,
    pub chain_congestion_factor: f64,
    pub exploit_frequency_factor: f64,
    pub liquidation_stress_factor: f64,
    pub final_multiplier: f64,
    /// Product of the five factors without the base rate
    pub risk_factor_product: f64,
    pub risk_tier: RiskTier,
    pub snapshot_id: String,
    pub timestamp: DateTime<Utc>,
}

/// What a pricing consumer gets for one product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProductRisk {
    Priced(RiskMultiplierBreakdown),
    /// Not priced this cycle; consumers must not issue against it
    Degraded {
        product: ProductKey,
        reason: String,
        /// Input domains that were unavailable for this product
        missing_inputs: Vec<DataDomain>,
        timestamp: DateTime<Utc>,
    },
}

impl ProductRisk {
    pub fn product(&self) -> ProductKey {
        match self {
            ProductRisk::Priced(b) => b.product,
            ProductRisk::Degraded { product, .. } => *product,
        }
    }

    pub fn breakdown(&self) -> Option<&RiskMultiplierBreakdown> {
        match self {
            ProductRisk::Priced(b) => Some(b),
            ProductRisk::Degraded { .. } => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, ProductRisk::Degraded { .. })
    }

    pub fn tier(&self) -> Option<RiskTier> {
        self.breakdown().map(|b| b.risk_tier)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub normal: usize,
    pub elevated: usize,
    pub high: usize,
    pub extreme: usize,
}

impl TierCounts {
    fn add(&mut self, tier: RiskTier) {
        match tier {
            RiskTier::Normal => self.normal += 1,
            RiskTier::Elevated => self.elevated += 1,
            RiskTier::High => self.high += 1,
            RiskTier::Extreme => self.extreme += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetSummary {
    pub total_products: usize,
    pub priced: usize,
    pub degraded: usize,
    pub mean_multiplier: f64,
    pub min_multiplier: f64,
    pub max_multiplier: f64,
    pub stddev_multiplier: f64,
    pub tiers: TierCounts,
}

impl FleetSummary {
    pub fn from_products(products: &[ProductRisk]) -> Self {
        let mut summary = FleetSummary {
            total_products: products.len(),
            ..Default::default()
        };

        let multipliers: Vec<f64> = products
            .iter()
            .filter_map(|p| p.breakdown())
            .map(|b| {
                summary.tiers.add(b.risk_tier);
                b.final_multiplier
            })
            .collect();
        summary.priced = multipliers.len();
        summary.degraded = products.len() - multipliers.len();

        if multipliers.is_empty() {
            return summary;
        }
        let n = multipliers.len() as f64;
        let mean = multipliers.iter().sum::<f64>() / n;
        summary.mean_multiplier = mean;
        summary.min_multiplier = multipliers.iter().copied().fold(f64::INFINITY, f64::min);
        summary.max_multiplier = multipliers.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        summary.stddev_multiplier =
            (multipliers.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / n).sqrt();
        summary
    }
}

/// Business circuit breaker verdict for one pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BusinessCircuit {
    Normal,
    /// Suspend new issuance for the affected products
    Halt {
        message: String,
        extreme_share: f64,
        affected: Vec<ProductKey>,
    },
}

impl BusinessCircuit {
    pub fn is_halted(&self) -> bool {
        matches!(self, BusinessCircuit::Halt { .. })
    }
}

/// Result of one full pass over the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskPass {
    pub snapshot_id: String,
    pub computed_at: DateTime<Utc>,
    pub products: Vec<ProductRisk>,
    pub summary: FleetSummary,
    pub circuit: BusinessCircuit,
}

impl RiskPass {
    pub fn get(&self, product: &ProductKey) -> Option<&ProductRisk> {
        self.products.iter().find(|p| p.product() == *product)
    }

    pub fn breakdowns(&self) -> impl Iterator<Item = &RiskMultiplierBreakdown> {
        self.products.iter().filter_map(|p| p.breakdown())
    }
}

/// Risk for one product against one snapshot.
///
/// A product is only priced when every input is live: a fresh consensus for
/// its stablecoin, bridge health and congestion for its chain, and the
/// liquidation domain. Anything less yields `Degraded` with the missing domains.
pub fn assess(
    product: ProductKey,
    snapshot: &MarketSnapshot,
    exploit_table: &ExploitTable,
    config: &RiskConfig,
) -> ProductRisk {
    let timestamp = snapshot.timestamp;

    let alert = snapshot.price_alert(product.stablecoin);
    if let Some(alert) = alert.filter(|a| a.kind == PriceAlertKind::CircuitOpen) {
        return ProductRisk::Degraded {
            product,
            reason: format!("price circuit open: {}", alert.message),
            missing_inputs: vec![DataDomain::Prices],
            timestamp,
        };
    }
    let price = snapshot.price(product.stablecoin);
    let bridge_health = snapshot.bridge_health(product.chain);
    let congestion = snapshot.congestion(product.chain);
    let liquidations_live = !snapshot.is_degraded(DataDomain::Liquidations);

    let mut missing_inputs = Vec::new();
    if price.is_none() {
        missing_inputs.push(DataDomain::Prices);
    }
    if bridge_health.is_none() {
        missing_inputs.push(DataDomain::BridgeHealth);
    }
    if !liquidations_live {
        missing_inputs.push(DataDomain::Liquidations);
    }
    if congestion.is_none() {
        missing_inputs.push(DataDomain::Congestion);
    }

    let (Some(price), Some(bridge_health), Some(congestion), true) =
        (price, bridge_health, congestion, liquidations_live)
    else {
        let reason = match alert {
            Some(alert) if price.is_none() => alert.message.clone(),
            _ if price.is_none() => format!("no consensus price for {}", product.stablecoin),
            _ => format!(
                "missing {} for {}",
                missing_inputs
                    .iter()
                    .map(|d| d.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
                product.chain
            ),
        };
        return ProductRisk::Degraded {
            product,
            reason,
            missing_inputs,
            timestamp,
        };
    };

    let base_rate = product.coverage_type.base_rate();
    let price_depeg_factor = factors::price_depeg_factor(price.price);
    let bridge_health_factor = factors::bridge_health_factor(bridge_health);
    let chain_congestion_factor = factors::chain_congestion_factor(congestion);
    let exploit_frequency_factor = exploit_table.factor(product.coverage_type, product.chain);
    let liquidation_stress_factor =
        factors::liquidation_stress_factor(snapshot.liquidations.stress_level);

    let risk_factor_product = price_depeg_factor
        * bridge_health_factor
        * chain_congestion_factor
        * exploit_frequency_factor
        * liquidation_stress_factor;
    let final_multiplier = base_rate * risk_factor_product;

    let risk_tier = match config.tier_basis {
        TierBasis::FinalMultiplier => config.tiers.classify(final_multiplier),
        TierBasis::RiskFactors => config.tiers.classify(risk_factor_product),
    };

    ProductRisk::Priced(RiskMultiplierBreakdown {
        product,
        base_rate,
        price_depeg_factor,
        bridge_health_factor,
        chain_congestion_factor,
        exploit_frequency_factor,
        liquidation_stress_factor,
        final_multiplier,
        risk_factor_product,
        risk_tier,
        snapshot_id: snapshot.snapshot_id.clone(),
        timestamp,
    })
}

#[derive(Debug, Clone)]
pub struct RiskScoreCalculator {
    config: Arc<RiskConfig>,
    exploit_table: Arc<ExploitTable>,
    catalog: Arc<ProductCatalog>,
}

impl RiskScoreCalculator {
    pub fn new(config: RiskConfig, exploit_table: ExploitTable) -> Self {
        Self::with_catalog(config, exploit_table, ProductCatalog::full())
    }

    pub fn with_catalog(config: RiskConfig, exploit_table: ExploitTable, catalog: ProductCatalog) -> Self {
        Self {
            config: Arc::new(config),
            exploit_table: Arc::new(exploit_table),
            catalog: Arc::new(catalog),
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ProductCatalog {
        &self.catalog
    }

    pub fn compute_product(&self, product: ProductKey, snapshot: &MarketSnapshot) -> ProductRisk {
        assess(product, snapshot, &self.exploit_table, &self.config)
    }

    /// Compute every product in catalog order, `batch_size` at a time
    pub async fn compute_all(&self, snapshot: Arc<MarketSnapshot>) -> RiskPass {
        let products = self.catalog.products();
        let mut results: Vec<Option<ProductRisk>> = vec![None; products.len()];
        let batch_size = self.config.batch_size.max(1);

        for (batch_index, batch) in products.chunks(batch_size).enumerate() {
            let offset = batch_index * batch_size;
            let mut tasks = JoinSet::new();
            for (i, product) in batch.iter().copied().enumerate() {
                let snapshot = Arc::clone(&snapshot);
                let table = Arc::clone(&self.exploit_table);
                let config = Arc::clone(&self.config);
                tasks.spawn(async move { (offset + i, assess(product, &snapshot, &table, &config)) });
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((index, risk)) => results[index] = Some(risk),
                    Err(e) => tracing::error!(error = %e, "Risk computation task failed"),
                }
            }
        }

        let products: Vec<ProductRisk> = results
            .into_iter()
            .zip(products)
            .map(|(risk, product)| {
                risk.unwrap_or_else(|| ProductRisk::Degraded {
                    product: *product,
                    reason: "risk computation failed".to_string(),
                    missing_inputs: Vec::new(),
                    timestamp: snapshot.timestamp,
                })
            })
            .collect();

        let summary = FleetSummary::from_products(&products);
        let circuit = self.business_circuit(&products);

        match &circuit {
            BusinessCircuit::Normal => tracing::info!(
                snapshot_id = %snapshot.snapshot_id,
                priced = summary.priced,
                degraded = summary.degraded,
                mean = summary.mean_multiplier,
                max = summary.max_multiplier,
                "Risk pass complete"
            ),
            BusinessCircuit::Halt { message, .. } => tracing::error!(
                snapshot_id = %snapshot.snapshot_id,
                extreme = summary.tiers.extreme,
                "🛑 {}", message
            ),
        }

        RiskPass {
            snapshot_id: snapshot.snapshot_id.clone(),
            computed_at: snapshot.timestamp,
            products,
            summary,
            circuit,
        }
    }

    /// Halt when the Extreme share of the whole catalog exceeds the threshold
    pub fn business_circuit(&self, products: &[ProductRisk]) -> BusinessCircuit {
        if products.is_empty() {
            return BusinessCircuit::Normal;
        }
        let affected: Vec<ProductKey> = products
            .iter()
            .filter(|p| p.tier() == Some(RiskTier::Extreme))
            .map(|p| p.product())
            .collect();
        let share = affected.len() as f64 / products.len() as f64;

        if share > self.config.extreme_halt_threshold {
            BusinessCircuit::Halt {
                message: format!(
                    "Business circuit breaker: {:.1}% of products in EXTREME tier (limit {:.1}%), suspend new issuance",
                    share * 100.0,
                    self.config.extreme_halt_threshold * 100.0
                ),
                extreme_share: share,
                affected,
            }
        } else {
            BusinessCircuit::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{DataQuality, PriceAlert};
    use crate::oracle::{BridgeHealth, ChainCongestion, ConsensusResult, LiquidationAggregate};
    use crate::types::{Chain, CoverageType, MarketStressLevel, Stablecoin};
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn consensus(asset: Stablecoin, price: f64) -> ConsensusResult {
        ConsensusResult {
            asset,
            price,
            confidence: 0.9,
            deviation: 0.0,
            source_count: 3,
            sources: vec!["binance".into(), "coinbase".into(), "pyth".into()],
            timestamp: ts(),
        }
    }

    /// Scenario snapshot: USDC 0.995, Arbitrum health 0.85, congestion 0.65, High stress
    fn snapshot() -> MarketSnapshot {
        let mut liquidations = LiquidationAggregate::empty(ts());
        liquidations.stress_level = MarketStressLevel::High;
        let mut snap = MarketSnapshot {
            snapshot_id: String::new(),
            timestamp: ts(),
            prices: vec![consensus(Stablecoin::USDC, 0.995)],
            bridges: vec![BridgeHealth {
                bridge: "Stargate".into(),
                chain: Chain::Arbitrum,
                health_score: 0.85,
                daily_volume_usd: 1.0e7,
                timestamp: ts(),
            }],
            liquidations,
            congestion: vec![ChainCongestion {
                chain: Chain::Arbitrum,
                congestion_score: 0.65,
                gas_used_ratio: 0.7,
                base_fee_gwei: 0.1,
                timestamp: ts(),
            }],
            degraded_domains: vec![],
            price_alerts: vec![],
            domain_as_of: vec![],
            data_quality: DataQuality::default(),
        };
        snap.snapshot_id = snap.fingerprint();
        snap
    }

    #[test]
    fn test_bridge_product_multiplier() {
        let product = ProductKey::new(CoverageType::Bridge, Chain::Arbitrum, Stablecoin::USDC);
        let risk = assess(product, &snapshot(), &ExploitTable::empty(), &RiskConfig::default());
        let b = risk.breakdown().unwrap();

        assert_eq!(b.price_depeg_factor, 1.0);
        assert_eq!(b.bridge_health_factor, 1.1);
        assert_eq!(b.chain_congestion_factor, 1.15);
        assert_eq!(b.exploit_frequency_factor, 1.20);
        assert_eq!(b.liquidation_stress_factor, 1.30);
        let expected = 0.015 * 1.0 * 1.1 * 1.15 * 1.20 * 1.30;
        assert!((b.final_multiplier - expected).abs() < 1e-12);
        assert!((b.final_multiplier - 0.0296).abs() < 1e-4);
        assert_eq!(b.risk_tier, RiskTier::Normal);
    }

    #[test]
    fn test_final_multiplier_is_exact_product_for_every_product() {
        let snap = snapshot();
        let table = ExploitTable::builtin();
        let config = RiskConfig::default();
        for product in ProductCatalog::full().products() {
            if let ProductRisk::Priced(b) = assess(*product, &snap, &table, &config) {
                let product_of_factors = b.base_rate
                    * b.price_depeg_factor
                    * b.bridge_health_factor
                    * b.chain_congestion_factor
                    * b.exploit_frequency_factor
                    * b.liquidation_stress_factor;
                assert!((b.final_multiplier - product_of_factors).abs() < 1e-15);
            }
        }
    }

    #[test]
    fn test_missing_price_degrades_product() {
        let product = ProductKey::new(CoverageType::Depeg, Chain::Arbitrum, Stablecoin::DAI);
        let risk = assess(product, &snapshot(), &ExploitTable::empty(), &RiskConfig::default());
        match risk {
            ProductRisk::Degraded { reason, .. } => assert!(reason.contains("DAI")),
            other => panic!("expected degraded, got {:?}", other),
        }
    }

    #[test]
    fn test_price_circuit_open_degrades_product() {
        let mut snap = snapshot();
        snap.prices.clear();
        snap.price_alerts.push(PriceAlert {
            asset: Stablecoin::USDC,
            kind: PriceAlertKind::CircuitOpen,
            message: "excessive deviation".into(),
            retained_price: Some(1.0),
        });
        let product = ProductKey::new(CoverageType::Depeg, Chain::Arbitrum, Stablecoin::USDC);
        let risk = assess(product, &snap, &ExploitTable::empty(), &RiskConfig::default());
        assert!(risk.is_degraded());
    }

    #[test]
    fn test_missing_chain_inputs_degrade_product() {
        let product = ProductKey::new(CoverageType::Oracle, Chain::Base, Stablecoin::USDC);
        let risk = assess(product, &snapshot(), &ExploitTable::empty(), &RiskConfig::default());
        match risk {
            ProductRisk::Degraded {
                reason,
                missing_inputs,
                ..
            } => {
                assert_eq!(missing_inputs, vec![DataDomain::BridgeHealth, DataDomain::Congestion]);
                assert!(reason.contains("bridge_health"));
                assert!(reason.contains("base"));
            }
            other => panic!("expected degraded, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_domains_are_never_priced_at_the_cheapest_bucket() {
        let mut snap = snapshot();
        snap.bridges.clear();
        snap.congestion.clear();
        snap.liquidations = LiquidationAggregate::empty(ts());
        snap.degraded_domains = vec![
            DataDomain::BridgeHealth,
            DataDomain::Liquidations,
            DataDomain::Congestion,
        ];
        let product = ProductKey::new(CoverageType::Bridge, Chain::Arbitrum, Stablecoin::USDC);
        let risk = assess(product, &snap, &ExploitTable::empty(), &RiskConfig::default());

        assert!(risk.is_degraded());
        assert_eq!(risk.tier(), None);
        match risk {
            ProductRisk::Degraded { missing_inputs, .. } => assert_eq!(
                missing_inputs,
                vec![DataDomain::BridgeHealth, DataDomain::Liquidations, DataDomain::Congestion]
            ),
            other => panic!("expected degraded, got {:?}", other),
        }
    }

    #[test]
    fn test_liquidation_outage_alone_degrades_product() {
        let mut snap = snapshot();
        snap.degraded_domains = vec![DataDomain::Liquidations];
        let product = ProductKey::new(CoverageType::CexLiquidation, Chain::Arbitrum, Stablecoin::USDC);
        let risk = assess(product, &snap, &ExploitTable::empty(), &RiskConfig::default());
        match risk {
            ProductRisk::Degraded { missing_inputs, .. } => {
                assert_eq!(missing_inputs, vec![DataDomain::Liquidations])
            }
            other => panic!("expected degraded, got {:?}", other),
        }
    }

    #[test]
    fn test_insufficient_consensus_degrades_with_alert_reason() {
        let mut snap = snapshot();
        snap.prices.clear();
        snap.price_alerts.push(PriceAlert {
            asset: Stablecoin::USDC,
            kind: PriceAlertKind::InsufficientConsensus,
            message: "insufficient consensus for USDC".into(),
            retained_price: Some(0.995),
        });
        let product = ProductKey::new(CoverageType::Bridge, Chain::Arbitrum, Stablecoin::USDC);
        match assess(product, &snap, &ExploitTable::empty(), &RiskConfig::default()) {
            ProductRisk::Degraded {
                reason,
                missing_inputs,
                ..
            } => {
                assert_eq!(reason, "insufficient consensus for USDC");
                assert_eq!(missing_inputs, vec![DataDomain::Prices]);
            }
            other => panic!("expected degraded, got {:?}", other),
        }
    }

    #[test]
    fn test_tier_basis_risk_factors() {
        let config = RiskConfig {
            tier_basis: TierBasis::RiskFactors,
            ..Default::default()
        };
        let product = ProductKey::new(CoverageType::Bridge, Chain::Arbitrum, Stablecoin::USDC);
        let b = assess(product, &snapshot(), &ExploitTable::empty(), &config)
            .breakdown()
            .cloned()
            .unwrap();
        // 1.1 * 1.15 * 1.2 * 1.3 = 1.9734
        assert!((b.risk_factor_product - 1.9734).abs() < 1e-9);
        assert_eq!(b.risk_tier, RiskTier::High);
    }

    #[tokio::test]
    async fn test_compute_all_covers_catalog_in_order() {
        let calculator = RiskScoreCalculator::new(RiskConfig::default(), ExploitTable::builtin());
        let pass = calculator.compute_all(Arc::new(snapshot())).await;

        assert_eq!(pass.products.len(), 245);
        let keys: Vec<ProductKey> = pass.products.iter().map(|p| p.product()).collect();
        assert_eq!(keys.as_slice(), ProductCatalog::full().products());

        // Only USDC on Arbitrum has every input
        assert_eq!(pass.summary.priced, 5);
        assert_eq!(pass.summary.degraded, 245 - 5);
        assert_eq!(pass.circuit, BusinessCircuit::Normal);
        assert!(pass.summary.min_multiplier <= pass.summary.mean_multiplier);
        assert!(pass.summary.mean_multiplier <= pass.summary.max_multiplier);
    }

    #[tokio::test]
    async fn test_business_circuit_halts_on_extreme_share() {
        let config = RiskConfig {
            tier_basis: TierBasis::RiskFactors,
            ..Default::default()
        };
        let mut snap = snapshot();
        // Deep depeg and extreme stress push factor products past 2.0
        snap.prices = Stablecoin::ALL.iter().map(|c| consensus(*c, 0.90)).collect();
        snap.liquidations.stress_level = MarketStressLevel::Extreme;

        let calculator = RiskScoreCalculator::new(config, ExploitTable::empty());
        let pass = calculator.compute_all(Arc::new(snap)).await;

        match &pass.circuit {
            BusinessCircuit::Halt {
                message,
                extreme_share,
                affected,
            } => {
                assert!(*extreme_share > 0.10);
                assert_eq!(affected.len(), pass.summary.tiers.extreme);
                assert!(message.contains('%'));
            }
            BusinessCircuit::Normal => panic!("expected halt"),
        }
    }

    #[test]
    fn test_fleet_summary_stats() {
        let snap = snapshot();
        let table = ExploitTable::empty();
        let config = RiskConfig::default();
        let products: Vec<ProductRisk> = CoverageType::ALL
            .iter()
            .map(|c| assess(ProductKey::new(*c, Chain::Arbitrum, Stablecoin::USDC), &snap, &table, &config))
            .collect();
        let summary = FleetSummary::from_products(&products);
        assert_eq!(summary.priced, 5);
        assert_eq!(summary.tiers.normal, 5);
        assert!(summary.stddev_multiplier > 0.0);
    }
}
