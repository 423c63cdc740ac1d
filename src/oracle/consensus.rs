//! Consensus Engine - Reconciles price readings from independent feeds
//!
//! Stale readings are dropped, survivors are screened against their median,
//! and the inliers are combined into a confidence-weighted price. A consensus
//! that jumps too far from the previous one is rejected and the previous value
//! is kept, so a single erratic cycle never reaches pricing.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::error::ConsensusError;
use crate::oracle::{ConsensusResult, PriceReading};
use crate::types::Stablecoin;

/// Consensus tuning
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Minimum fresh inlier readings required to publish a consensus
    pub min_sources: usize,
    /// Readings older than this never participate
    pub staleness_threshold: Duration,
    /// Relative distance from the median beyond which a reading is an outlier
    pub outlier_threshold: f64,
    /// Relative change from the previous consensus that trips the breaker
    pub circuit_breaker_threshold: f64,
    /// Per-source weight multiplier (defaults to 1.0 for unlisted sources)
    pub source_weights: HashMap<String, f64>,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            min_sources: 2,
            staleness_threshold: Duration::seconds(60),
            outlier_threshold: 0.02,
            circuit_breaker_threshold: 0.05,
            source_weights: HashMap::new(),
        }
    }
}

/// Consensus engine holding the last accepted value per asset
#[derive(Debug, Clone)]
pub struct ConsensusEngine {
    config: ConsensusConfig,
    previous: HashMap<Stablecoin, ConsensusResult>,
}

impl ConsensusEngine {
    pub fn new(config: ConsensusConfig) -> Self {
        Self {
            config,
            previous: HashMap::new(),
        }
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Last accepted consensus for an asset
    pub fn current(&self, asset: Stablecoin) -> Option<&ConsensusResult> {
        self.previous.get(&asset)
    }

    /// Operator override: forget the retained value so the next cycle can
    /// re-anchor after a confirmed market move.
    pub fn reset(&mut self, asset: Stablecoin) -> Option<ConsensusResult> {
        tracing::warn!(asset = %asset, "Consensus anchor reset");
        self.previous.remove(&asset)
    }

    fn source_weight(&self, source: &str) -> f64 {
        self.config
            .source_weights
            .get(source)
            .copied()
            .unwrap_or(1.0)
            .max(0.0)
    }

    /// Reconcile all readings for `asset` observed up to `now`.
    ///
    /// On success the new consensus replaces the retained one. On error the
    /// retained value (see [`ConsensusEngine::current`]) is left untouched.
    pub fn compute(
        &mut self,
        asset: Stablecoin,
        readings: &[PriceReading],
        now: DateTime<Utc>,
    ) -> Result<ConsensusResult, ConsensusError> {
        let staleness = self.config.staleness_threshold;

        let fresh: Vec<&PriceReading> = readings
            .iter()
            .filter(|r| r.asset == asset)
            .filter(|r| r.price.is_finite() && r.price > 0.0)
            .filter(|r| now - r.timestamp <= staleness)
            .collect();

        if fresh.len() < self.config.min_sources {
            return Err(ConsensusError::InsufficientConsensus {
                asset,
                required: self.config.min_sources,
                available: fresh.len(),
            });
        }

        let prices: Vec<f64> = fresh.iter().map(|r| r.price).collect();
        let median = median(&prices);

        let (inliers, outliers): (Vec<&PriceReading>, Vec<&PriceReading>) = fresh
            .into_iter()
            .partition(|r| ((r.price - median) / median).abs() <= self.config.outlier_threshold);

        for outlier in &outliers {
            tracing::debug!(
                asset = %asset,
                source = %outlier.source,
                price = outlier.price,
                median,
                "Outlier excluded from consensus"
            );
        }

        if inliers.len() < self.config.min_sources {
            return Err(ConsensusError::InsufficientConsensus {
                asset,
                required: self.config.min_sources,
                available: inliers.len(),
            });
        }

        let weights: Vec<f64> = inliers
            .iter()
            .map(|r| r.confidence.clamp(0.0, 1.0) * self.source_weight(&r.source))
            .collect();
        let weight_sum: f64 = weights.iter().sum();

        let price = if weight_sum > 0.0 {
            inliers
                .iter()
                .zip(&weights)
                .map(|(r, w)| r.price * w)
                .sum::<f64>()
                / weight_sum
        } else {
            inliers.iter().map(|r| r.price).sum::<f64>() / inliers.len() as f64
        };

        let n = inliers.len() as f64;
        let confidence = inliers
            .iter()
            .map(|r| r.confidence.clamp(0.0, 1.0))
            .sum::<f64>()
            / n;
        let mean = inliers.iter().map(|r| r.price).sum::<f64>() / n;
        let deviation =
            (inliers.iter().map(|r| (r.price - mean).powi(2)).sum::<f64>() / n).sqrt();

        if let Some(prev) = self.previous.get(&asset) {
            let change = ((price - prev.price) / prev.price).abs();
            if change > self.config.circuit_breaker_threshold {
                tracing::warn!(
                    asset = %asset,
                    previous = prev.price,
                    proposed = price,
                    change_pct = change * 100.0,
                    "🛑 Consensus circuit breaker tripped, keeping previous value"
                );
                return Err(ConsensusError::ExcessiveDeviation {
                    asset,
                    previous: prev.price,
                    proposed: price,
                    change_pct: change * 100.0,
                    threshold_pct: self.config.circuit_breaker_threshold * 100.0,
                });
            }
        }

        let mut sources: Vec<String> = inliers.iter().map(|r| r.source.clone()).collect();
        sources.sort();

        let result = ConsensusResult {
            asset,
            price,
            confidence,
            deviation,
            source_count: inliers.len(),
            sources,
            timestamp: now,
        };
        self.previous.insert(asset, result.clone());
        Ok(result)
    }
}

impl Default for ConsensusEngine {
    fn default() -> Self {
        Self::new(ConsensusConfig::default())
    }
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
