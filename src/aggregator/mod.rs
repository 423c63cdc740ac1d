//! Market Data Aggregator
//!
//! Fans out to every data source once per pass and merges the results into one
//! validated [`MarketSnapshot`]:
//!
//! - each source sits behind its own [`CircuitBreaker`] and a per-call timeout
//! - the four domains are fetched concurrently; a failing domain degrades to
//!   its default value without touching the others
//! - readings pass bounds and rolling z-score validation before use
//! - prices are reconciled per stablecoin by the [`ConsensusEngine`]
//! - snapshots, domains and per-asset consensus are cached with a TTL, and a
//!   fresh snapshot is served without any external call
//!
//! All mutable pass state lives in one `AggregatorState` behind an async
//! mutex, so passes are serialized and concurrent callers share one result.

mod cache;
mod snapshot;
pub mod validation;

pub use cache::{CacheEntry, CacheKey, TtlCache};
pub use snapshot::{DataQuality, MarketSnapshot, PriceAlert, PriceAlertKind, ReadingOutcome};
pub use validation::{HistoricalWindows, RollingWindow, ValidationConfig};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

use crate::circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitBreakerState};
use crate::error::{ConsensusError, SourceError};
use crate::monitor::SnapshotProvider;
use crate::oracle::sources::{BridgeHealthFeed, CongestionFeed, LiquidationFeed, PriceFeed};
use crate::oracle::{
    BridgeHealth, ChainCongestion, ConsensusConfig, ConsensusEngine, ConsensusResult,
    LiquidationAggregate, PriceReading,
};
use crate::persistence::HistoryStore;
use crate::types::{Chain, DataDomain, Stablecoin};

/// Cache lifetime per domain
#[derive(Debug, Clone)]
pub struct DomainTtls {
    pub prices: Duration,
    pub bridges: Duration,
    pub liquidations: Duration,
    pub congestion: Duration,
}

impl Default for DomainTtls {
    fn default() -> Self {
        Self {
            prices: Duration::seconds(30),
            bridges: Duration::seconds(60),
            liquidations: Duration::seconds(30),
            congestion: Duration::seconds(30),
        }
    }
}

impl DomainTtls {
    pub fn get(&self, domain: DataDomain) -> Duration {
        match domain {
            DataDomain::Prices => self.prices,
            DataDomain::BridgeHealth => self.bridges,
            DataDomain::Liquidations => self.liquidations,
            DataDomain::Congestion => self.congestion,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub stablecoins: Vec<Stablecoin>,
    pub chains: Vec<Chain>,
    pub snapshot_ttl: Duration,
    pub domain_ttls: DomainTtls,
    /// Upper bound on one source call, retries included
    pub source_timeout: std::time::Duration,
    pub breaker: BreakerConfig,
    pub validation: ValidationConfig,
    pub consensus: ConsensusConfig,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            stablecoins: Stablecoin::ALL.to_vec(),
            chains: Chain::ALL.to_vec(),
            snapshot_ttl: Duration::seconds(30),
            domain_ttls: DomainTtls::default(),
            source_timeout: std::time::Duration::from_secs(10),
            breaker: BreakerConfig::default(),
            validation: ValidationConfig::default(),
            consensus: ConsensusConfig::default(),
        }
    }
}

/// The data sources one aggregator reads from
#[derive(Clone)]
pub struct MarketSources {
    pub prices: Vec<Arc<dyn PriceFeed>>,
    pub bridges: Arc<dyn BridgeHealthFeed>,
    pub liquidations: Arc<dyn LiquidationFeed>,
    pub congestion: Arc<dyn CongestionFeed>,
}

#[derive(Debug, Clone)]
pub enum DomainData {
    Prices {
        prices: Vec<ConsensusResult>,
        alerts: Vec<PriceAlert>,
    },
    Bridges(Vec<BridgeHealth>),
    Liquidations(LiquidationAggregate),
    Congestion(Vec<ChainCongestion>),
}

#[derive(Debug, Clone)]
pub enum Cached {
    Snapshot(Arc<MarketSnapshot>),
    Domain {
        data: Arc<DomainData>,
        as_of: DateTime<Utc>,
    },
    Consensus(Arc<ConsensusResult>),
}

/// What the status query reports
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregatorStatus {
    pub breakers: Vec<CircuitBreakerState>,
    pub data_quality: Option<DataQuality>,
    pub last_snapshot_id: Option<String>,
    pub last_snapshot_at: Option<DateTime<Utc>>,
    pub degraded_domains: Vec<DataDomain>,
    pub price_alerts: Vec<PriceAlert>,
    pub passes: u64,
    pub cache_hit_rate: f64,
    pub persistence_failures: u64,
}

/// Mutable state owned by the aggregator and touched only during a pass
struct AggregatorState {
    breaker_config: BreakerConfig,
    breakers: HashMap<String, CircuitBreaker>,
    windows: HistoricalWindows,
    consensus: ConsensusEngine,
    passes: u64,
}

impl AggregatorState {
    fn breaker(&mut self, source: &str) -> &mut CircuitBreaker {
        let config = &self.breaker_config;
        self.breakers
            .entry(source.to_string())
            .or_insert_with(|| CircuitBreaker::new(source, config.clone()))
    }

    fn breaker_states(&self) -> Vec<CircuitBreakerState> {
        let mut states: Vec<CircuitBreakerState> =
            self.breakers.values().map(|b| b.snapshot()).collect();
        states.sort_by(|a, b| a.source.cmp(&b.source));
        states
    }
}

/// What one pass made of the raw provider readings
struct PriceAbsorption {
    prices: Vec<ConsensusResult>,
    alerts: Vec<PriceAlert>,
    readings: Vec<ReadingOutcome>,
    /// At least one provider answered
    any_ok: bool,
}

#[derive(Debug, Default)]
struct PassTally {
    attempted: usize,
    succeeded: usize,
    failed: usize,
    anomalies: usize,
}

/// Bound a source call by `timeout`
async fn guarded<T, Fut>(source: &str, timeout: std::time::Duration, call: Fut) -> Result<T, SourceError>
where
    Fut: Future<Output = Result<T, SourceError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Timeout {
            source_name: source.to_string(),
            after_ms: timeout.as_millis() as u64,
        }),
    }
}

pub struct MarketDataAggregator {
    config: AggregatorConfig,
    sources: MarketSources,
    state: Mutex<AggregatorState>,
    cache: TtlCache<CacheKey, Cached>,
    history: Option<Arc<dyn HistoryStore>>,
    status: RwLock<AggregatorStatus>,
    persistence_failures: AtomicU64,
}

impl MarketDataAggregator {
    pub fn new(config: AggregatorConfig, sources: MarketSources) -> Self {
        let mut state = AggregatorState {
            breaker_config: config.breaker.clone(),
            breakers: HashMap::new(),
            windows: HistoricalWindows::new(config.validation.clone()),
            consensus: ConsensusEngine::new(config.consensus.clone()),
            passes: 0,
        };
        // Breakers exist from the start so the status query lists every source
        for feed in &sources.prices {
            state.breaker(feed.name());
        }
        state.breaker(sources.bridges.name());
        state.breaker(sources.liquidations.name());
        state.breaker(sources.congestion.name());

        let status = AggregatorStatus {
            breakers: state.breaker_states(),
            ..Default::default()
        };

        Self {
            config,
            sources,
            state: Mutex::new(state),
            cache: TtlCache::new(),
            history: None,
            status: RwLock::new(status),
            persistence_failures: AtomicU64::new(0),
        }
    }

    /// Append every completed snapshot to `history`
    pub fn with_history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub async fn get_snapshot(&self) -> Arc<MarketSnapshot> {
        self.get_snapshot_at(Utc::now()).await
    }

    /// Fresh cached snapshot if there is one, otherwise run a pass at `now`
    pub async fn get_snapshot_at(&self, now: DateTime<Utc>) -> Arc<MarketSnapshot> {
        if let Some(Cached::Snapshot(snapshot)) = self.cache.get_at(&CacheKey::Snapshot, now) {
            tracing::debug!(snapshot_id = %snapshot.snapshot_id, "Serving cached snapshot");
            return snapshot;
        }

        let mut state = self.state.lock().await;

        // Another caller may have finished a pass while we waited for the lock
        if let Some(entry) = self.cache.peek(&CacheKey::Snapshot) {
            if let (true, Cached::Snapshot(snapshot)) = (entry.is_fresh(now), entry.value) {
                return snapshot;
            }
        }

        self.run_pass(&mut state, now).await
    }

    /// Last snapshot built, even if its TTL has expired
    pub fn last_snapshot(&self) -> Option<Arc<MarketSnapshot>> {
        match self.cache.peek(&CacheKey::Snapshot)?.value {
            Cached::Snapshot(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    /// Fresh per-asset consensus from the cache
    pub fn cached_consensus(&self, asset: Stablecoin, now: DateTime<Utc>) -> Option<Arc<ConsensusResult>> {
        match self.cache.get_at(&CacheKey::Asset(asset), now)? {
            Cached::Consensus(result) => Some(result),
            _ => None,
        }
    }

    /// Operator override: forget the retained consensus for `asset` so the
    /// next pass can re-anchor after a confirmed move.
    ///
    /// The cached price domain and snapshot still carry the pre-reset
    /// alert, so both are dropped and the next call runs a fresh pass.
    pub async fn reset_consensus(&self, asset: Stablecoin) -> Option<ConsensusResult> {
        let mut state = self.state.lock().await;
        let dropped = state.consensus.reset(asset);
        self.cache.invalidate(&CacheKey::Asset(asset));
        self.cache.invalidate(&CacheKey::Domain(DataDomain::Prices));
        self.cache.invalidate(&CacheKey::Snapshot);
        tracing::warn!(asset = %asset, had_value = dropped.is_some(), "Consensus reset by operator");
        dropped
    }

    pub fn status(&self) -> AggregatorStatus {
        let mut status = self
            .status
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        status.cache_hit_rate = self.cache.hit_rate();
        status.persistence_failures = self.persistence_failures.load(Ordering::Relaxed);
        status
    }

    fn fresh_domain(&self, domain: DataDomain, now: DateTime<Utc>) -> Option<(Arc<DomainData>, DateTime<Utc>)> {
        match self.cache.get_at(&CacheKey::Domain(domain), now)? {
            Cached::Domain { data, as_of } => Some((data, as_of)),
            _ => None,
        }
    }

    fn permit(state: &mut AggregatorState, source: &str, now: DateTime<Utc>, tally: &mut PassTally) -> bool {
        tally.attempted += 1;
        match state.breaker(source).check_circuit(now) {
            Ok(()) => true,
            Err(e) => {
                tally.failed += 1;
                tracing::debug!(source, error = %e, "Skipping source");
                false
            }
        }
    }

    fn record<T>(
        state: &mut AggregatorState,
        source: &str,
        result: &Result<T, SourceError>,
        now: DateTime<Utc>,
        tally: &mut PassTally,
    ) -> bool {
        match result {
            Ok(_) => {
                state.breaker(source).record_success();
                tally.succeeded += 1;
                true
            }
            Err(e) => {
                state.breaker(source).record_failure(now);
                tally.failed += 1;
                tracing::warn!(source, error = %e, "Source call failed");
                false
            }
        }
    }

    async fn run_pass(&self, state: &mut AggregatorState, now: DateTime<Utc>) -> Arc<MarketSnapshot> {
        let mut tally = PassTally::default();
        state.passes += 1;

        let purged = self.cache.purge_expired(now);
        if purged > 0 {
            tracing::debug!(purged, "Dropped expired cache entries");
        }

        let cached_prices = self.fresh_domain(DataDomain::Prices, now);
        let cached_bridges = self.fresh_domain(DataDomain::BridgeHealth, now);
        let cached_liquidations = self.fresh_domain(DataDomain::Liquidations, now);
        let cached_congestion = self.fresh_domain(DataDomain::Congestion, now);

        // Gate every due source through its breaker before any call goes out
        let price_feeds: Vec<Arc<dyn PriceFeed>> = if cached_prices.is_none() {
            self.sources
                .prices
                .iter()
                .filter(|feed| Self::permit(state, feed.name(), now, &mut tally))
                .cloned()
                .collect()
        } else {
            Vec::new()
        };
        let call_bridges = cached_bridges.is_none()
            && Self::permit(state, self.sources.bridges.name(), now, &mut tally);
        let call_liquidations = cached_liquidations.is_none()
            && Self::permit(state, self.sources.liquidations.name(), now, &mut tally);
        let call_congestion = cached_congestion.is_none()
            && Self::permit(state, self.sources.congestion.name(), now, &mut tally);

        let timeout = self.config.source_timeout;
        let assets = self.config.stablecoins.as_slice();
        let chains = self.config.chains.as_slice();

        let price_calls = join_all(price_feeds.into_iter().map(|feed| async move {
            let name = feed.name();
            let result = guarded(name, timeout, feed.fetch_prices(assets)).await;
            (name, result)
        }));
        let bridge_call = async {
            if call_bridges {
                let feed = &self.sources.bridges;
                Some(guarded(feed.name(), timeout, feed.fetch_bridge_health(chains)).await)
            } else {
                None
            }
        };
        let liquidation_call = async {
            if call_liquidations {
                let feed = &self.sources.liquidations;
                Some(guarded(feed.name(), timeout, feed.fetch_liquidations()).await)
            } else {
                None
            }
        };
        let congestion_call = async {
            if call_congestion {
                let feed = &self.sources.congestion;
                Some(guarded(feed.name(), timeout, feed.fetch_congestion(chains)).await)
            } else {
                None
            }
        };

        let (price_results, bridge_result, liquidation_result, congestion_result) =
            tokio::join!(price_calls, bridge_call, liquidation_call, congestion_call);

        let mut degraded = Vec::new();
        let mut domain_as_of = Vec::with_capacity(DataDomain::ALL.len());

        // Prices; raw readings only exist when the providers were called
        let (prices, price_alerts, readings) = match cached_prices.as_ref().map(|(d, at)| (d.as_ref(), *at)) {
            Some((DomainData::Prices { prices, alerts }, as_of)) => {
                domain_as_of.push((DataDomain::Prices, as_of));
                (prices.clone(), alerts.clone(), Vec::new())
            }
            _ => {
                let absorbed = self.absorb_prices(state, price_results, now, &mut tally);
                if absorbed.any_ok {
                    self.store_domain(
                        DataDomain::Prices,
                        DomainData::Prices {
                            prices: absorbed.prices.clone(),
                            alerts: absorbed.alerts.clone(),
                        },
                        now,
                    );
                } else {
                    degraded.push(DataDomain::Prices);
                }
                domain_as_of.push((DataDomain::Prices, now));
                (absorbed.prices, absorbed.alerts, absorbed.readings)
            }
        };

        // Bridge health
        let bridges = match cached_bridges.as_ref().map(|(d, at)| (d.as_ref(), *at)) {
            Some((DomainData::Bridges(bridges), as_of)) => {
                domain_as_of.push((DataDomain::BridgeHealth, as_of));
                bridges.clone()
            }
            _ => {
                let name = self.sources.bridges.name();
                let accepted = match bridge_result {
                    Some(result) if Self::record(state, name, &result, now, &mut tally) => {
                        let bridges = result.unwrap_or_default();
                        Some(Self::validate_bridges(state, bridges, now, &mut tally))
                    }
                    _ => None,
                };
                domain_as_of.push((DataDomain::BridgeHealth, now));
                match accepted {
                    Some(bridges) => {
                        self.store_domain(DataDomain::BridgeHealth, DomainData::Bridges(bridges.clone()), now);
                        bridges
                    }
                    None => {
                        degraded.push(DataDomain::BridgeHealth);
                        Vec::new()
                    }
                }
            }
        };

        // Liquidations
        let liquidations = match cached_liquidations.as_ref().map(|(d, at)| (d.as_ref(), *at)) {
            Some((DomainData::Liquidations(agg), as_of)) => {
                domain_as_of.push((DataDomain::Liquidations, as_of));
                agg.clone()
            }
            _ => {
                let name = self.sources.liquidations.name();
                let accepted = match liquidation_result {
                    Some(result) if Self::record(state, name, &result, now, &mut tally) => result
                        .ok()
                        .and_then(|agg| Self::validate_liquidations(agg, now, &mut tally)),
                    _ => None,
                };
                domain_as_of.push((DataDomain::Liquidations, now));
                match accepted {
                    Some(agg) => {
                        self.store_domain(DataDomain::Liquidations, DomainData::Liquidations(agg.clone()), now);
                        agg
                    }
                    None => {
                        degraded.push(DataDomain::Liquidations);
                        LiquidationAggregate::empty(now)
                    }
                }
            }
        };

        // Congestion
        let congestion = match cached_congestion.as_ref().map(|(d, at)| (d.as_ref(), *at)) {
            Some((DomainData::Congestion(congestion), as_of)) => {
                domain_as_of.push((DataDomain::Congestion, as_of));
                congestion.clone()
            }
            _ => {
                let name = self.sources.congestion.name();
                let accepted = match congestion_result {
                    Some(result) if Self::record(state, name, &result, now, &mut tally) => {
                        let congestion = result.unwrap_or_default();
                        Some(Self::validate_congestion(state, congestion, now, &mut tally))
                    }
                    _ => None,
                };
                domain_as_of.push((DataDomain::Congestion, now));
                match accepted {
                    Some(congestion) => {
                        self.store_domain(DataDomain::Congestion, DomainData::Congestion(congestion.clone()), now);
                        congestion
                    }
                    None => {
                        degraded.push(DataDomain::Congestion);
                        Vec::new()
                    }
                }
            }
        };

        degraded.sort();
        let data_quality = DataQuality {
            total_sources: tally.attempted,
            successful_sources: tally.succeeded,
            failed_sources: tally.failed,
            anomalies_detected: tally.anomalies,
            cache_hit_rate: self.cache.hit_rate(),
        };

        let mut snapshot = MarketSnapshot {
            snapshot_id: String::new(),
            timestamp: now,
            prices,
            bridges,
            liquidations,
            congestion,
            degraded_domains: degraded,
            price_alerts,
            domain_as_of,
            data_quality,
        };
        snapshot.snapshot_id = snapshot.fingerprint();
        let snapshot = Arc::new(snapshot);

        self.cache.put_at(
            CacheKey::Snapshot,
            Cached::Snapshot(Arc::clone(&snapshot)),
            self.config.snapshot_ttl,
            now,
        );

        tracing::info!(
            snapshot_id = %snapshot.snapshot_id,
            prices = snapshot.prices.len(),
            bridges = snapshot.bridges.len(),
            stress = %snapshot.liquidations.stress_level,
            degraded = ?snapshot.degraded_domains,
            sources_ok = snapshot.data_quality.successful_sources,
            sources_failed = snapshot.data_quality.failed_sources,
            anomalies = snapshot.data_quality.anomalies_detected,
            "📊 Market snapshot assembled"
        );

        if let Some(history) = &self.history {
            match history.append_snapshot(&snapshot).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(snapshot_id = %snapshot.snapshot_id, "Snapshot already recorded")
                }
                Err(e) => {
                    self.persistence_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        snapshot_id = %snapshot.snapshot_id,
                        error = %format!("{:#}", e),
                        "Snapshot history append failed"
                    );
                }
            }
            if !readings.is_empty() {
                if let Err(e) = history.append_readings(&snapshot, &readings).await {
                    self.persistence_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        snapshot_id = %snapshot.snapshot_id,
                        readings = readings.len(),
                        error = %format!("{:#}", e),
                        "Price reading history append failed"
                    );
                }
            }
        }

        let status = AggregatorStatus {
            breakers: state.breaker_states(),
            data_quality: Some(snapshot.data_quality.clone()),
            last_snapshot_id: Some(snapshot.snapshot_id.clone()),
            last_snapshot_at: Some(now),
            degraded_domains: snapshot.degraded_domains.clone(),
            price_alerts: snapshot.price_alerts.clone(),
            passes: state.passes,
            cache_hit_rate: self.cache.hit_rate(),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
        };
        *self.status.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = status;

        snapshot
    }

    fn store_domain(&self, domain: DataDomain, data: DomainData, now: DateTime<Utc>) {
        self.cache.put_at(
            CacheKey::Domain(domain),
            Cached::Domain {
                data: Arc::new(data),
                as_of: now,
            },
            self.config.domain_ttls.get(domain),
            now,
        );
    }

    /// Record provider outcomes, validate readings and reconcile each asset
    fn absorb_prices(
        &self,
        state: &mut AggregatorState,
        results: Vec<(&'static str, Result<Vec<PriceReading>, SourceError>)>,
        now: DateTime<Utc>,
        tally: &mut PassTally,
    ) -> PriceAbsorption {
        let mut readings = Vec::new();
        let mut outcomes = Vec::new();
        let mut any_ok = false;

        for (name, result) in results {
            if !Self::record(state, name, &result, now, tally) {
                continue;
            }
            any_ok = true;
            for reading in result.unwrap_or_default() {
                let metric = format!("price:{}:{}", reading.source, reading.asset);
                match state.windows.validate_price(&metric, reading.price) {
                    Ok(_) => readings.push(reading),
                    Err(e) => {
                        tally.anomalies += 1;
                        tracing::warn!(source = name, error = %e, "Price reading dropped");
                        outcomes.push(ReadingOutcome::rejected(reading, e.to_string()));
                    }
                }
            }
        }

        let ttl = self.config.domain_ttls.prices;
        let mut prices = Vec::with_capacity(self.config.stablecoins.len());
        let mut alerts = Vec::new();

        for &asset in &self.config.stablecoins {
            match state.consensus.compute(asset, &readings, now) {
                Ok(result) => {
                    self.cache.put_at(
                        CacheKey::Asset(asset),
                        Cached::Consensus(Arc::new(result.clone())),
                        ttl,
                        now,
                    );
                    prices.push(result);
                }
                Err(e @ ConsensusError::InsufficientConsensus { .. }) => {
                    tally.anomalies += 1;
                    let retained = state.consensus.current(asset).map(|r| r.price);
                    tracing::warn!(asset = %asset, error = %e, ?retained, "No fresh consensus");
                    alerts.push(PriceAlert {
                        asset,
                        kind: PriceAlertKind::InsufficientConsensus,
                        message: e.to_string(),
                        retained_price: retained,
                    });
                }
                Err(e @ ConsensusError::ExcessiveDeviation { .. }) => {
                    tally.anomalies += 1;
                    alerts.push(PriceAlert {
                        asset,
                        kind: PriceAlertKind::CircuitOpen,
                        message: e.to_string(),
                        retained_price: state.consensus.current(asset).map(|r| r.price),
                    });
                }
            }
        }

        for reading in readings {
            let used = prices
                .iter()
                .any(|p| p.asset == reading.asset && p.sources.contains(&reading.source));
            outcomes.push(if used {
                ReadingOutcome::accepted(reading)
            } else {
                ReadingOutcome::rejected(reading, "excluded from consensus".to_string())
            });
        }

        PriceAbsorption {
            prices,
            alerts,
            readings: outcomes,
            any_ok,
        }
    }

    fn validate_bridges(
        state: &mut AggregatorState,
        bridges: Vec<BridgeHealth>,
        now: DateTime<Utc>,
        tally: &mut PassTally,
    ) -> Vec<BridgeHealth> {
        bridges
            .into_iter()
            .filter_map(|mut bridge| {
                let metric = format!("bridge:{}:{}", bridge.bridge, bridge.chain);
                match state.windows.validate_unit(&metric, bridge.health_score) {
                    Ok(_) => {
                        bridge.timestamp = now;
                        Some(bridge)
                    }
                    Err(e) => {
                        tally.anomalies += 1;
                        tracing::warn!(error = %e, "Bridge health dropped");
                        None
                    }
                }
            })
            .collect()
    }

    fn validate_liquidations(
        mut agg: LiquidationAggregate,
        now: DateTime<Utc>,
        tally: &mut PassTally,
    ) -> Option<LiquidationAggregate> {
        let checks = [
            ("liquidations:total_usd", agg.total_usd),
            ("liquidations:long_usd", agg.long_usd),
            ("liquidations:short_usd", agg.short_usd),
        ];
        for (metric, value) in checks {
            if let Err(e) = validation::check_bounds(metric, value, 0.0, f64::MAX) {
                tally.anomalies += 1;
                tracing::warn!(error = %e, "Liquidation aggregate dropped");
                return None;
            }
        }
        agg.timestamp = now;
        Some(agg)
    }

    fn validate_congestion(
        state: &mut AggregatorState,
        congestion: Vec<ChainCongestion>,
        now: DateTime<Utc>,
        tally: &mut PassTally,
    ) -> Vec<ChainCongestion> {
        congestion
            .into_iter()
            .filter_map(|mut reading| {
                let metric = format!("congestion:{}", reading.chain);
                match state.windows.validate_unit(&metric, reading.congestion_score) {
                    Ok(_) => {
                        reading.timestamp = now;
                        Some(reading)
                    }
                    Err(e) => {
                        tally.anomalies += 1;
                        tracing::warn!(error = %e, "Congestion reading dropped");
                        None
                    }
                }
            })
            .collect()
    }
}

#[async_trait]
impl SnapshotProvider for MarketDataAggregator {
    async fn latest_snapshot(&self) -> Arc<MarketSnapshot> {
        self.get_snapshot().await
    }

    fn status(&self) -> AggregatorStatus {
        MarketDataAggregator::status(self)
    }
}
