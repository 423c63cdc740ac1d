//! Dashboard Module
//!
//! HTTP/WebSocket surface for the risk table and pipeline status.
//! Only compiled when the `dashboard` feature is enabled.

mod api;
mod types;
mod websocket;

pub use api::create_router;
pub use types::*;
pub use websocket::WebSocketBroadcaster;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;

use crate::monitor::MonitorLoop;

/// Serve the dashboard on `bind` until `shutdown` flips to true
pub async fn serve(
    bind: &str,
    monitor: Arc<MonitorLoop>,
    broadcaster: WebSocketBroadcaster,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind dashboard on {}", bind))?;
    tracing::info!(bind = %bind, "🖥️ Dashboard listening");

    axum::serve(listener, create_router(monitor, broadcaster))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .context("Dashboard server failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{AggregatorStatus, DataQuality, MarketSnapshot};
    use crate::monitor::{MockSnapshotProvider, MonitorConfig, RiskTable};
    use crate::oracle::{BridgeHealth, ChainCongestion, ConsensusResult, LiquidationAggregate};
    use crate::risk::{ExploitTable, RiskConfig, RiskScoreCalculator};
    use crate::types::{Chain, DataDomain};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use tower::ServiceExt;

    fn snapshot() -> MarketSnapshot {
        let now = Utc::now();
        let mut snap = MarketSnapshot {
            snapshot_id: String::new(),
            timestamp: now,
            prices: vec![ConsensusResult {
                asset: crate::types::Stablecoin::USDC,
                price: 1.0,
                confidence: 0.9,
                deviation: 0.0,
                source_count: 2,
                sources: vec!["binance".into(), "coinbase".into()],
                timestamp: now,
            }],
            bridges: vec![BridgeHealth {
                bridge: "Stargate".into(),
                chain: Chain::Ethereum,
                health_score: 0.95,
                daily_volume_usd: 1.0e6,
                timestamp: now,
            }],
            liquidations: LiquidationAggregate::empty(now),
            congestion: vec![ChainCongestion {
                chain: Chain::Ethereum,
                congestion_score: 0.2,
                gas_used_ratio: 0.4,
                base_fee_gwei: 5.0,
                timestamp: now,
            }],
            degraded_domains: vec![],
            price_alerts: vec![],
            domain_as_of: vec![],
            data_quality: DataQuality::default(),
        };
        snap.snapshot_id = snap.fingerprint();
        snap
    }

    fn monitor() -> Arc<MonitorLoop> {
        let snap = Arc::new(snapshot());
        let mut provider = MockSnapshotProvider::new();
        provider
            .expect_latest_snapshot()
            .returning(move || Arc::clone(&snap));
        provider.expect_status().returning(|| AggregatorStatus {
            degraded_domains: vec![DataDomain::Congestion],
            last_snapshot_at: Some(Utc::now()),
            ..AggregatorStatus::default()
        });
        Arc::new(MonitorLoop::new(
            MonitorConfig::default(),
            Arc::new(provider),
            Arc::new(RiskScoreCalculator::new(RiskConfig::default(), ExploitTable::builtin())),
            RiskTable::default(),
        ))
    }

    async fn get(monitor: Arc<MonitorLoop>, uri: &str) -> (StatusCode, serde_json::Value) {
        let router = create_router(monitor, WebSocketBroadcaster::default());
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_risk_table_unavailable_before_first_pass() {
        let (status, body) = get(monitor(), "/api/risk").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["success"], false);

        let (_, health) = get(monitor(), "/api/health").await;
        assert_eq!(health["data"]["status"], "starting");
    }

    #[tokio::test]
    async fn test_product_lookup_after_pass() {
        let monitor = monitor();
        monitor.run_once().await.unwrap();

        let (status, body) = get(Arc::clone(&monitor), "/api/risk/depeg/ethereum/usdc").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "priced");
        assert_eq!(body["data"]["risk_tier"], "Normal");

        let (status, body) = get(Arc::clone(&monitor), "/api/risk/bridge/base/DAI").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "degraded");

        // Priced asset on a chain with no bridge or congestion data
        let (_, body) = get(Arc::clone(&monitor), "/api/risk/bridge/base/USDC").await;
        assert_eq!(body["data"]["status"], "degraded");
        assert_eq!(body["data"]["missing_inputs"], serde_json::json!(["BridgeHealth", "Congestion"]));
        assert!(body["data"].get("final_multiplier").is_none());

        let (status, _) = get(Arc::clone(&monitor), "/api/risk/depeg/solana/USDC").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = get(Arc::clone(&monitor), "/api/risk").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["products"].as_array().map(|p| p.len()), Some(245));
    }

    #[tokio::test]
    async fn test_status_and_health_report_degraded_domains() {
        let monitor = monitor();
        monitor.run_once().await.unwrap();

        let (_, status) = get(Arc::clone(&monitor), "/api/status").await;
        assert_eq!(status["data"]["aggregator"]["degraded_domains"][0], "Congestion");

        let (_, health) = get(monitor, "/api/health").await;
        assert_eq!(health["data"]["status"], "degraded");
    }
}
