//! End-to-end tests for the sources -> aggregator -> risk -> monitor pipeline

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use riskoracle::aggregator::{AggregatorConfig, MarketDataAggregator, MarketSources, PriceAlertKind};
    use riskoracle::circuit_breaker::BreakerPosition;
    use riskoracle::error::SourceError;
    use riskoracle::monitor::{Alert, AlertSeverity, AlertSink, MonitorConfig, MonitorLoop, RiskTable};
    use riskoracle::oracle::sources::{BridgeHealthFeed, CongestionFeed, LiquidationFeed, PriceFeed};
    use riskoracle::oracle::{BridgeHealth, ChainCongestion, LiquidationAggregate, PriceReading};
    use riskoracle::persistence::{CsvPersistence, HistoryStore};
    use riskoracle::risk::{ExploitTable, ProductRisk, RiskConfig, RiskScoreCalculator, TierBasis};
    use riskoracle::types::{Chain, CoverageType, DataDomain, MarketStressLevel, ProductKey, RiskTier, Stablecoin};

    // ============================================================================
    // Fake sources
    // ============================================================================

    struct FakePriceFeed {
        name: &'static str,
        quotes: Mutex<HashMap<Stablecoin, (f64, f64)>>,
        failing: AtomicBool,
        calls: AtomicUsize,
    }

    impl FakePriceFeed {
        fn new(name: &'static str, quotes: &[(Stablecoin, f64, f64)]) -> Arc<Self> {
            Arc::new(Self {
                name,
                quotes: Mutex::new(
                    quotes
                        .iter()
                        .map(|&(asset, price, confidence)| (asset, (price, confidence)))
                        .collect(),
                ),
                failing: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            let feed = Self::new(name, &[]);
            feed.failing.store(true, Ordering::SeqCst);
            feed
        }

        fn set_price(&self, asset: Stablecoin, price: f64) {
            let mut quotes = self.quotes.lock().unwrap();
            let confidence = quotes.get(&asset).map(|q| q.1).unwrap_or(0.9);
            quotes.insert(asset, (price, confidence));
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PriceFeed for FakePriceFeed {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn fetch_prices(&self, assets: &[Stablecoin]) -> Result<Vec<PriceReading>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(SourceError::unavailable(self.name, "connection refused"));
            }
            let quotes = self.quotes.lock().unwrap();
            Ok(assets
                .iter()
                .filter_map(|asset| {
                    quotes.get(asset).map(|&(price, confidence)| PriceReading {
                        source: self.name.to_string(),
                        asset: *asset,
                        price,
                        confidence,
                        timestamp: Utc::now(),
                    })
                })
                .collect())
        }
    }

    struct FakeBridges {
        health: Vec<(Chain, f64)>,
        failing: bool,
    }

    #[async_trait]
    impl BridgeHealthFeed for FakeBridges {
        fn name(&self) -> &'static str {
            "fake_bridges"
        }

        async fn fetch_bridge_health(&self, chains: &[Chain]) -> Result<Vec<BridgeHealth>, SourceError> {
            if self.failing {
                return Err(SourceError::HttpStatus {
                    source_name: "fake_bridges".to_string(),
                    status: 502,
                });
            }
            Ok(self
                .health
                .iter()
                .filter(|(chain, _)| chains.contains(chain))
                .map(|&(chain, health_score)| BridgeHealth {
                    bridge: format!("bridge-{}", chain.key()),
                    chain,
                    health_score,
                    daily_volume_usd: 1_000_000.0,
                    timestamp: Utc::now(),
                })
                .collect())
        }
    }

    struct FakeLiquidations {
        stress: MarketStressLevel,
    }

    #[async_trait]
    impl LiquidationFeed for FakeLiquidations {
        fn name(&self) -> &'static str {
            "fake_liquidations"
        }

        async fn fetch_liquidations(&self) -> Result<LiquidationAggregate, SourceError> {
            Ok(LiquidationAggregate {
                window_secs: 3600,
                total_usd: 25_000_000.0,
                long_usd: 15_000_000.0,
                short_usd: 10_000_000.0,
                event_count: 120,
                stress_level: self.stress,
                timestamp: Utc::now(),
            })
        }
    }

    struct FakeCongestion {
        scores: Vec<(Chain, f64)>,
        delay: Option<std::time::Duration>,
    }

    #[async_trait]
    impl CongestionFeed for FakeCongestion {
        fn name(&self) -> &'static str {
            "fake_rpc"
        }

        async fn fetch_congestion(&self, chains: &[Chain]) -> Result<Vec<ChainCongestion>, SourceError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self
                .scores
                .iter()
                .filter(|(chain, _)| chains.contains(chain))
                .map(|&(chain, congestion_score)| ChainCongestion {
                    chain,
                    congestion_score,
                    gas_used_ratio: congestion_score,
                    base_fee_gwei: 12.0,
                    timestamp: Utc::now(),
                })
                .collect())
        }
    }

    #[derive(Default)]
    struct RecordingAlerts {
        sent: Mutex<Vec<Alert>>,
    }

    #[async_trait]
    impl AlertSink for RecordingAlerts {
        async fn send(&self, alert: Alert) -> Result<()> {
            self.sent.lock().unwrap().push(alert);
            Ok(())
        }
    }

    // ============================================================================
    // Helpers
    // ============================================================================

    fn all_chains(value: f64) -> Vec<(Chain, f64)> {
        Chain::ALL.iter().map(|&chain| (chain, value)).collect()
    }

    fn quiet_market(prices: Vec<Arc<dyn PriceFeed>>) -> MarketSources {
        MarketSources {
            prices,
            bridges: Arc::new(FakeBridges {
                health: all_chains(0.95),
                failing: false,
            }),
            liquidations: Arc::new(FakeLiquidations {
                stress: MarketStressLevel::Normal,
            }),
            congestion: Arc::new(FakeCongestion {
                scores: all_chains(0.1),
                delay: None,
            }),
        }
    }

    fn pegged_feeds() -> Vec<Arc<dyn PriceFeed>> {
        let quotes: Vec<(Stablecoin, f64, f64)> =
            Stablecoin::ALL.iter().map(|&asset| (asset, 1.0, 0.9)).collect();
        vec![
            FakePriceFeed::new("binance", &quotes),
            FakePriceFeed::new("coinbase", &quotes),
        ]
    }

    fn temp_data_dir(test_name: &str) -> String {
        std::env::temp_dir()
            .join(format!("riskoracle_pipeline_{}_{}", test_name, uuid::Uuid::new_v4()))
            .to_string_lossy()
            .into_owned()
    }

    fn product(coverage: CoverageType, chain: Chain, stablecoin: Stablecoin) -> ProductKey {
        ProductKey::new(coverage, chain, stablecoin)
    }

    fn window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now - Duration::hours(1), now + Duration::hours(1))
    }

    // ============================================================================
    // Consensus through the aggregator
    // ============================================================================

    #[tokio::test]
    async fn test_outlier_feed_excluded_from_consensus() {
        let feeds: Vec<Arc<dyn PriceFeed>> = vec![
            FakePriceFeed::new("chainlink", &[(Stablecoin::USDC, 0.999, 0.90)]),
            FakePriceFeed::new("pyth", &[(Stablecoin::USDC, 1.001, 0.85)]),
            FakePriceFeed::new("binance", &[(Stablecoin::USDC, 0.850, 0.95)]),
        ];
        let aggregator = MarketDataAggregator::new(AggregatorConfig::default(), quiet_market(feeds));

        let snapshot = aggregator.get_snapshot().await;
        let usdc = snapshot.price(Stablecoin::USDC).expect("USDC consensus");

        assert!((usdc.price - 0.99997).abs() < 1e-4);
        assert!((usdc.confidence - 0.875).abs() < 1e-9);
        assert_eq!(usdc.source_count, 2);
        assert_eq!(usdc.sources, vec!["chainlink".to_string(), "pyth".to_string()]);
    }

    #[tokio::test]
    async fn test_erratic_move_keeps_previous_price_and_degrades_products() {
        let chainlink = FakePriceFeed::new("chainlink", &[(Stablecoin::USDC, 1.0, 0.9)]);
        let pyth = FakePriceFeed::new("pyth", &[(Stablecoin::USDC, 1.0, 0.9)]);
        let feeds: Vec<Arc<dyn PriceFeed>> = vec![chainlink.clone(), pyth.clone()];
        let aggregator = MarketDataAggregator::new(AggregatorConfig::default(), quiet_market(feeds));
        let calculator = RiskScoreCalculator::new(RiskConfig::default(), ExploitTable::builtin());
        let depeg_usdc = product(CoverageType::Depeg, Chain::Ethereum, Stablecoin::USDC);

        let t0 = Utc::now();
        let first = aggregator.get_snapshot_at(t0).await;
        assert_eq!(first.price(Stablecoin::USDC).map(|p| p.price), Some(1.0));
        let pass = calculator.compute_all(first).await;
        assert!(!pass.get(&depeg_usdc).unwrap().is_degraded());

        chainlink.set_price(Stablecoin::USDC, 0.93);
        pyth.set_price(Stablecoin::USDC, 0.93);

        let second = aggregator.get_snapshot_at(t0 + Duration::seconds(31)).await;
        assert!(second.price(Stablecoin::USDC).is_none());
        let alert = second.price_alert(Stablecoin::USDC).expect("circuit alert");
        assert_eq!(alert.kind, PriceAlertKind::CircuitOpen);
        assert_eq!(alert.retained_price, Some(1.0));

        let pass = calculator.compute_all(second).await;
        let usdc_products: Vec<&ProductRisk> = pass
            .products
            .iter()
            .filter(|p| p.product().stablecoin == Stablecoin::USDC)
            .collect();
        assert_eq!(usdc_products.len(), 35);
        assert!(usdc_products.iter().all(|p| p.is_degraded()));
        match pass.get(&depeg_usdc) {
            Some(ProductRisk::Degraded { reason, .. }) => assert!(reason.contains("circuit open")),
            other => panic!("expected degraded product, got {:?}", other),
        }
    }

    // ============================================================================
    // Risk multiplier end to end
    // ============================================================================

    #[tokio::test]
    async fn test_bridge_multiplier_from_live_inputs() {
        let feeds: Vec<Arc<dyn PriceFeed>> = vec![
            FakePriceFeed::new("binance", &[(Stablecoin::USDC, 0.995, 0.9)]),
            FakePriceFeed::new("coinbase", &[(Stablecoin::USDC, 0.995, 0.9)]),
        ];
        let sources = MarketSources {
            prices: feeds,
            bridges: Arc::new(FakeBridges {
                health: vec![(Chain::Arbitrum, 0.85)],
                failing: false,
            }),
            liquidations: Arc::new(FakeLiquidations {
                stress: MarketStressLevel::High,
            }),
            congestion: Arc::new(FakeCongestion {
                scores: vec![(Chain::Arbitrum, 0.65)],
                delay: None,
            }),
        };
        let aggregator = MarketDataAggregator::new(AggregatorConfig::default(), sources);
        let calculator = RiskScoreCalculator::new(RiskConfig::default(), ExploitTable::empty());

        let snapshot = aggregator.get_snapshot().await;
        assert!(snapshot.degraded_domains.is_empty());
        let pass = calculator.compute_all(snapshot).await;

        let risk = pass
            .get(&product(CoverageType::Bridge, Chain::Arbitrum, Stablecoin::USDC))
            .and_then(|p| p.breakdown())
            .expect("priced bridge product");

        assert_eq!(risk.price_depeg_factor, 1.0);
        assert_eq!(risk.bridge_health_factor, 1.1);
        assert_eq!(risk.chain_congestion_factor, 1.15);
        assert_eq!(risk.exploit_frequency_factor, 1.20);
        assert_eq!(risk.liquidation_stress_factor, 1.30);
        let expected = 0.015 * 1.0 * 1.1 * 1.15 * 1.20 * 1.30;
        assert!((risk.final_multiplier - expected).abs() < 1e-12);
        assert!((risk.final_multiplier - 0.0296).abs() < 1e-4);
        assert_eq!(risk.risk_tier, RiskTier::Normal);
    }

    #[tokio::test]
    async fn test_products_without_consensus_are_degraded() {
        let feeds: Vec<Arc<dyn PriceFeed>> = vec![
            FakePriceFeed::new(
                "binance",
                &[(Stablecoin::USDC, 1.0, 0.9), (Stablecoin::USDT, 1.0, 0.9)],
            ),
            FakePriceFeed::new(
                "coinbase",
                &[(Stablecoin::USDC, 1.0, 0.9), (Stablecoin::USDT, 1.0, 0.9)],
            ),
        ];
        let aggregator = MarketDataAggregator::new(AggregatorConfig::default(), quiet_market(feeds));
        let calculator = RiskScoreCalculator::new(RiskConfig::default(), ExploitTable::builtin());

        let pass = calculator.compute_all(aggregator.get_snapshot().await).await;

        assert_eq!(pass.summary.total_products, 245);
        assert_eq!(pass.summary.priced, 70);
        assert_eq!(pass.summary.degraded, 175);
        assert!(pass
            .get(&product(CoverageType::Oracle, Chain::Base, Stablecoin::DAI))
            .unwrap()
            .is_degraded());
        assert!(!pass.circuit.is_halted());
    }

    // ============================================================================
    // Fault isolation
    // ============================================================================

    #[tokio::test]
    async fn test_failing_domain_does_not_affect_others() {
        let sources = MarketSources {
            prices: pegged_feeds(),
            bridges: Arc::new(FakeBridges {
                health: Vec::new(),
                failing: true,
            }),
            liquidations: Arc::new(FakeLiquidations {
                stress: MarketStressLevel::Normal,
            }),
            congestion: Arc::new(FakeCongestion {
                scores: all_chains(0.1),
                delay: None,
            }),
        };
        let aggregator = MarketDataAggregator::new(AggregatorConfig::default(), sources);
        let calculator = RiskScoreCalculator::new(RiskConfig::default(), ExploitTable::builtin());

        let snapshot = aggregator.get_snapshot().await;
        assert_eq!(snapshot.degraded_domains, vec![DataDomain::BridgeHealth]);
        assert_eq!(snapshot.prices.len(), Stablecoin::ALL.len());
        assert_eq!(snapshot.congestion.len(), Chain::ALL.len());

        // Without bridge health no product can be priced
        let pass = calculator.compute_all(snapshot).await;
        assert_eq!(pass.summary.priced, 0);
        assert_eq!(pass.summary.degraded, 245);
        match pass.get(&product(CoverageType::Depeg, Chain::Ethereum, Stablecoin::USDC)) {
            Some(ProductRisk::Degraded { missing_inputs, .. }) => {
                assert_eq!(missing_inputs, &vec![DataDomain::BridgeHealth])
            }
            other => panic!("expected degraded product, got {:?}", other),
        }
    }

    struct DownLiquidations;

    #[async_trait]
    impl LiquidationFeed for DownLiquidations {
        fn name(&self) -> &'static str {
            "fake_liquidations"
        }

        async fn fetch_liquidations(&self) -> Result<LiquidationAggregate, SourceError> {
            Err(SourceError::unavailable("fake_liquidations", "connection reset"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_chain_domains_down_prices_nothing() {
        let sources = MarketSources {
            prices: pegged_feeds(),
            bridges: Arc::new(FakeBridges {
                health: Vec::new(),
                failing: true,
            }),
            liquidations: Arc::new(DownLiquidations),
            congestion: Arc::new(FakeCongestion {
                scores: all_chains(0.1),
                delay: Some(std::time::Duration::from_secs(30)),
            }),
        };
        let config = AggregatorConfig {
            source_timeout: std::time::Duration::from_secs(2),
            ..AggregatorConfig::default()
        };
        let aggregator = MarketDataAggregator::new(config, sources);
        let calculator = RiskScoreCalculator::new(RiskConfig::default(), ExploitTable::builtin());

        let snapshot = aggregator.get_snapshot().await;
        assert_eq!(
            snapshot.degraded_domains,
            vec![DataDomain::BridgeHealth, DataDomain::Liquidations, DataDomain::Congestion]
        );
        assert_eq!(snapshot.prices.len(), Stablecoin::ALL.len());

        let pass = calculator.compute_all(snapshot).await;
        assert_eq!(pass.summary.priced, 0);
        assert_eq!(pass.summary.degraded, 245);
        assert!(pass.products.iter().all(|p| p.breakdown().is_none()));
        assert!(!pass.circuit.is_halted());
        match pass.get(&product(CoverageType::Bridge, Chain::Arbitrum, Stablecoin::USDT)) {
            Some(ProductRisk::Degraded { missing_inputs, .. }) => assert_eq!(
                missing_inputs,
                &vec![DataDomain::BridgeHealth, DataDomain::Liquidations, DataDomain::Congestion]
            ),
            other => panic!("expected degraded product, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failing_feed_breaker_opens_and_skips_calls() {
        let flaky = FakePriceFeed::failing("flaky");
        let mut feeds = pegged_feeds();
        feeds.push(flaky.clone());
        let aggregator = MarketDataAggregator::new(AggregatorConfig::default(), quiet_market(feeds));

        let t0 = Utc::now();
        for step in 0..4 {
            aggregator
                .get_snapshot_at(t0 + Duration::seconds(31 * step))
                .await;
        }

        // Third consecutive failure opens the breaker, the fourth pass is inside the cooldown
        assert_eq!(flaky.calls(), 3);
        let status = aggregator.status();
        let breaker = status
            .breakers
            .iter()
            .find(|b| b.source == "flaky")
            .expect("flaky breaker");
        assert_eq!(breaker.state, BreakerPosition::Open);
        assert_eq!(breaker.total_failures, 3);

        let healthy = status.breakers.iter().find(|b| b.source == "binance").unwrap();
        assert_eq!(healthy.state, BreakerPosition::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_source_times_out_without_stalling_the_pass() {
        let mut config = AggregatorConfig::default();
        config.source_timeout = std::time::Duration::from_secs(2);
        let sources = MarketSources {
            congestion: Arc::new(FakeCongestion {
                scores: all_chains(0.1),
                delay: Some(std::time::Duration::from_secs(30)),
            }),
            ..quiet_market(pegged_feeds())
        };
        let aggregator = MarketDataAggregator::new(config, sources);

        let started = tokio::time::Instant::now();
        let snapshot = aggregator.get_snapshot().await;

        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        assert_eq!(snapshot.degraded_domains, vec![DataDomain::Congestion]);
        assert_eq!(snapshot.prices.len(), Stablecoin::ALL.len());
        assert!(snapshot.congestion.is_empty());

        let status = aggregator.status();
        let rpc = status.breakers.iter().find(|b| b.source == "fake_rpc").unwrap();
        assert_eq!(rpc.failure_count, 1);
    }

    #[tokio::test]
    async fn test_fresh_snapshot_served_without_source_calls() {
        let feed = FakePriceFeed::new("binance", &[(Stablecoin::USDC, 1.0, 0.9)]);
        let feeds: Vec<Arc<dyn PriceFeed>> = vec![feed.clone(), FakePriceFeed::new("coinbase", &[])];
        let aggregator = MarketDataAggregator::new(AggregatorConfig::default(), quiet_market(feeds));

        let t0 = Utc::now();
        let first = aggregator.get_snapshot_at(t0).await;
        let second = aggregator.get_snapshot_at(t0 + Duration::seconds(5)).await;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(feed.calls(), 1);
    }

    // ============================================================================
    // Monitor cycle with history
    // ============================================================================

    #[tokio::test]
    async fn test_repeated_cycle_over_same_snapshot_writes_history_once() {
        let history = Arc::new(CsvPersistence::new(&temp_data_dir("idempotent")).unwrap());
        let aggregator = Arc::new(
            MarketDataAggregator::new(AggregatorConfig::default(), quiet_market(pegged_feeds()))
                .with_history(history.clone()),
        );
        let monitor = MonitorLoop::new(
            MonitorConfig::default(),
            aggregator,
            Arc::new(RiskScoreCalculator::new(RiskConfig::default(), ExploitTable::builtin())),
            RiskTable::default(),
        )
        .with_history(history.clone());

        let first = monitor.run_once().await.unwrap();
        let second = monitor.run_once().await.unwrap();
        assert_eq!(first.snapshot_id, second.snapshot_id);
        assert_eq!(monitor.table().current().unwrap().snapshot_id, first.snapshot_id);

        let (from, to) = window(first.computed_at);
        assert_eq!(history.load_snapshots(from, to).unwrap().len(), 1);
        assert_eq!(history.load_multipliers(None, from, to).unwrap().len(), 245);
        assert_eq!(
            history
                .load_prices(Stablecoin::USDC, from, to)
                .unwrap()
                .len(),
            1
        );

        // Raw readings are written once, for the pass that called the providers
        let readings = history.load_readings(Some(Stablecoin::USDC), from, to).unwrap();
        assert_eq!(readings.len(), 2);
        assert!(readings.iter().all(|r| r.accepted && r.snapshot_id == first.snapshot_id));
        assert_eq!(
            history.load_readings(None, from, to).unwrap().len(),
            2 * Stablecoin::ALL.len()
        );

        // A replayed pass is recognised by its snapshot id
        assert_eq!(history.append_risk_pass(&first).await.unwrap(), 0);
        assert_eq!(history.load_multipliers(None, from, to).unwrap().len(), 245);

        let one = product(CoverageType::SmartContract, Chain::Polygon, Stablecoin::FRAX);
        let rows = history.load_multipliers(Some(&one), from, to).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, "priced");
    }

    #[tokio::test]
    async fn test_stressed_market_halts_issuance_and_alerts() {
        let sources = MarketSources {
            prices: pegged_feeds(),
            bridges: Arc::new(FakeBridges {
                health: all_chains(0.3),
                failing: false,
            }),
            liquidations: Arc::new(FakeLiquidations {
                stress: MarketStressLevel::Extreme,
            }),
            congestion: Arc::new(FakeCongestion {
                scores: all_chains(0.1),
                delay: None,
            }),
        };
        let aggregator = Arc::new(MarketDataAggregator::new(AggregatorConfig::default(), sources));
        let risk_config = RiskConfig {
            tier_basis: TierBasis::RiskFactors,
            ..RiskConfig::default()
        };
        let alerts = Arc::new(RecordingAlerts::default());
        let monitor = MonitorLoop::new(
            MonitorConfig::default(),
            aggregator,
            Arc::new(RiskScoreCalculator::new(risk_config, ExploitTable::builtin())),
            RiskTable::default(),
        )
        .with_alert_sink(alerts.clone());

        monitor.tick().await;
        let pass = monitor.table().current().expect("published pass");

        // Bridge 2.0 x stress 1.5 puts every priced product at or above 3.0
        assert_eq!(pass.summary.tiers.extreme, 245);
        assert!(pass.circuit.is_halted());
        assert_eq!(monitor.stats().halted_cycles, 1);

        let sent = alerts.sent.lock().unwrap();
        assert!(sent
            .iter()
            .any(|a| a.severity == AlertSeverity::Critical && a.snapshot_id == pass.snapshot_id));
    }
}
