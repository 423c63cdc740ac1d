//! Bucket tables mapping market signals onto risk factors

use crate::types::{MarketStressLevel, RiskTier};

/// Factor from the stablecoin's distance to its peg
pub fn price_depeg_factor(price: f64) -> f64 {
    let depeg = (1.0 - price).abs();
    if depeg < 0.01 {
        1.0
    } else if depeg < 0.02 {
        1.1
    } else if depeg < 0.05 {
        1.3
    } else {
        1.5
    }
}

/// Factor from mean bridge health on the product's chain; lower health, higher factor
pub fn bridge_health_factor(health: f64) -> f64 {
    if health > 0.90 {
        1.0
    } else if health > 0.75 {
        1.1
    } else if health > 0.60 {
        1.3
    } else if health > 0.40 {
        1.6
    } else {
        2.0
    }
}

pub fn chain_congestion_factor(congestion: f64) -> f64 {
    if congestion < 0.3 {
        1.0
    } else if congestion < 0.5 {
        1.05
    } else if congestion < 0.7 {
        1.15
    } else {
        1.30
    }
}

pub fn liquidation_stress_factor(level: MarketStressLevel) -> f64 {
    match level {
        MarketStressLevel::Normal => 1.0,
        MarketStressLevel::Elevated => 1.15,
        MarketStressLevel::High => 1.30,
        MarketStressLevel::Extreme => 1.50,
    }
}

/// Upper bounds (exclusive) of the Normal, Elevated and High tiers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierThresholds {
    pub elevated: f64,
    pub high: f64,
    pub extreme: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            elevated: 1.2,
            high: 1.5,
            extreme: 2.0,
        }
    }
}

impl TierThresholds {
    pub fn classify(&self, value: f64) -> RiskTier {
        if value < self.elevated {
            RiskTier::Normal
        } else if value < self.high {
            RiskTier::Elevated
        } else if value < self.extreme {
            RiskTier::High
        } else {
            RiskTier::Extreme
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depeg_buckets() {
        assert_eq!(price_depeg_factor(1.0), 1.0);
        assert_eq!(price_depeg_factor(0.995), 1.0);
        assert_eq!(price_depeg_factor(1.015), 1.1);
        assert_eq!(price_depeg_factor(0.97), 1.3);
        assert_eq!(price_depeg_factor(0.90), 1.5);
        assert_eq!(price_depeg_factor(1.06), 1.5);
    }

    #[test]
    fn test_bridge_health_edges_fall_on_the_worse_side() {
        assert_eq!(bridge_health_factor(1.0), 1.0);
        assert_eq!(bridge_health_factor(0.91), 1.0);
        assert_eq!(bridge_health_factor(0.90), 1.1);
        assert_eq!(bridge_health_factor(0.85), 1.1);
        assert_eq!(bridge_health_factor(0.75), 1.3);
        assert_eq!(bridge_health_factor(0.60), 1.6);
        assert_eq!(bridge_health_factor(0.40), 2.0);
        assert_eq!(bridge_health_factor(0.0), 2.0);
    }

    #[test]
    fn test_congestion_buckets() {
        assert_eq!(chain_congestion_factor(0.0), 1.0);
        assert_eq!(chain_congestion_factor(0.3), 1.05);
        assert_eq!(chain_congestion_factor(0.5), 1.15);
        assert_eq!(chain_congestion_factor(0.65), 1.15);
        assert_eq!(chain_congestion_factor(0.7), 1.30);
        assert_eq!(chain_congestion_factor(1.0), 1.30);
    }

    #[test]
    fn test_stress_factors() {
        assert_eq!(liquidation_stress_factor(MarketStressLevel::Normal), 1.0);
        assert_eq!(liquidation_stress_factor(MarketStressLevel::High), 1.30);
        assert_eq!(liquidation_stress_factor(MarketStressLevel::Extreme), 1.50);
    }

    #[test]
    fn test_tier_edges() {
        let tiers = TierThresholds::default();
        assert_eq!(tiers.classify(0.0296), RiskTier::Normal);
        assert_eq!(tiers.classify(1.1999), RiskTier::Normal);
        assert_eq!(tiers.classify(1.2), RiskTier::Elevated);
        assert_eq!(tiers.classify(1.5), RiskTier::High);
        assert_eq!(tiers.classify(2.0), RiskTier::Extreme);
    }
}
