//! RiskOracle - Parametric coverage risk data plane
//!
//! Wires the source clients, aggregator, risk calculator, history store and
//! monitor loop together, then runs until Ctrl-C.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use riskoracle::aggregator::{MarketDataAggregator, MarketSources};
use riskoracle::config::AppConfig;
use riskoracle::monitor::{MonitorLoop, RiskTable, SnapshotProvider};
use riskoracle::oracle::sources::{
    BinanceClient, CoinbaseClient, DefiLlamaBridgeClient, EvmCongestionClient, JsonHttp,
    OkxLiquidationClient, PriceFeed, PythClient,
};
use riskoracle::persistence::{CsvPersistence, HistoryStore};
use riskoracle::risk::RiskScoreCalculator;

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn"));
    let json = std::env::var("RISKORACLE_LOG_JSON")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))
}

fn build_sources(config: &AppConfig) -> Result<MarketSources> {
    let http = JsonHttp::new(config.source_timeout(), config.retry_policy())?;

    let mut prices: Vec<Arc<dyn PriceFeed>> = Vec::new();
    if config.sources.binance_enabled {
        prices.push(Arc::new(BinanceClient::new(http.clone())));
    }
    if config.sources.coinbase_enabled {
        prices.push(Arc::new(CoinbaseClient::new(http.clone())));
    }
    if config.sources.pyth_enabled {
        let feed_ids = config.pyth_feed_ids()?;
        if feed_ids.is_empty() {
            warn!("Pyth enabled without feed ids; it will report no prices");
        }
        prices.push(Arc::new(PythClient::new(http.clone(), feed_ids)));
    }

    let rpc_urls = config.rpc_urls()?;
    for chain in config.chains()? {
        if !rpc_urls.contains_key(&chain) {
            warn!(chain = %chain, "No RPC url configured; congestion for this chain is unavailable");
        }
    }

    Ok(MarketSources {
        prices,
        bridges: Arc::new(DefiLlamaBridgeClient::new(
            http.clone(),
            config.sources.defillama_top_n,
        )),
        liquidations: Arc::new(OkxLiquidationClient::new(
            http.clone(),
            config.okx_instruments(),
            chrono::Duration::seconds(config.sources.okx_window_secs),
            config.stress_thresholds(),
        )),
        congestion: Arc::new(EvmCongestionClient::new(http, rpc_urls)),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let config = AppConfig::load()?;
    info!("🚀 RiskOracle {} starting", env!("CARGO_PKG_VERSION"));
    info!(config = %config.digest(), "Configuration loaded");

    let history: Option<Arc<CsvPersistence>> = if config.persistence.csv_enabled {
        Some(Arc::new(
            CsvPersistence::new(&config.persistence.data_dir)
                .context("Failed to initialize CSV persistence")?,
        ))
    } else {
        None
    };

    let mut aggregator =
        MarketDataAggregator::new(config.aggregator_config()?, build_sources(&config)?);
    if let Some(history) = &history {
        aggregator = aggregator.with_history(Arc::clone(history) as Arc<dyn HistoryStore>);
    }
    let aggregator = Arc::new(aggregator);

    let exploit_table = config.exploit_table()?;
    info!(entries = exploit_table.len(), "Exploit table ready");
    let calculator = Arc::new(RiskScoreCalculator::new(config.risk_config(), exploit_table));
    info!(products = calculator.catalog().len(), "Product catalog ready");

    let table = RiskTable::new(config.dashboard.broadcast_capacity);
    let mut monitor = MonitorLoop::new(
        config.monitor_config(),
        Arc::clone(&aggregator) as Arc<dyn SnapshotProvider>,
        calculator,
        table.clone(),
    );
    if let Some(history) = &history {
        monitor = monitor.with_history(Arc::clone(history) as Arc<dyn HistoryStore>);
    }
    let monitor = Arc::new(monitor);
    let task = Arc::clone(&monitor).start();

    let (shutdown_tx, _shutdown_rx) = tokio::sync::watch::channel(false);

    #[cfg(feature = "dashboard")]
    let dashboard = if config.dashboard.enabled {
        let broadcaster =
            riskoracle::dashboard::WebSocketBroadcaster::new(config.dashboard.broadcast_capacity);
        let relay = broadcaster.forward_from(&table);
        let bind = config.dashboard.bind.clone();
        let shutdown = shutdown_tx.subscribe();
        let server_monitor = Arc::clone(&monitor);
        let server = tokio::spawn(async move {
            if let Err(e) =
                riskoracle::dashboard::serve(&bind, server_monitor, broadcaster, shutdown).await
            {
                tracing::error!(error = %format!("{:#}", e), "Dashboard stopped");
            }
        });
        Some((relay, server))
    } else {
        None
    };
    #[cfg(not(feature = "dashboard"))]
    if config.dashboard.enabled {
        warn!("dashboard.enabled is set but the binary was built without the `dashboard` feature");
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Ctrl-C received, shutting down");

    let _ = shutdown_tx.send(true);
    let runs = task.stop().await;

    #[cfg(feature = "dashboard")]
    if let Some((relay, server)) = dashboard {
        relay.abort();
        let _ = server.await;
    }

    let stats = monitor.stats();
    info!(
        runs,
        cycles = stats.cycles,
        failed = stats.failed_cycles,
        halted = stats.halted_cycles,
        last_snapshot = ?stats.last_snapshot_id,
        "RiskOracle stopped"
    );
    Ok(())
}
