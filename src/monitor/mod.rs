//! Monitor Loop
//!
//! The only component with a lifecycle. Each tick runs one cycle:
//!
//! 1. obtain the latest [`MarketSnapshot`] from a [`SnapshotProvider`]
//! 2. compute the risk pass over the whole catalog
//! 3. append the pass to history
//! 4. publish it to the [`RiskTable`] (point queries + push channel)
//! 5. run the update callbacks
//! 6. raise alerts for a tripped business breaker or degraded data
//!
//! Errors inside a cycle are logged and counted. They never stop the loop.

mod alerts;
mod scheduler;
mod table;

pub use alerts::{Alert, AlertSeverity, AlertSink, LogAlertSink};
pub use scheduler::ScheduledTask;
pub use table::{RiskTable, RiskUpdate};

#[cfg(test)]
pub use alerts::MockAlertSink;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::aggregator::{AggregatorStatus, MarketSnapshot, PriceAlertKind};
use crate::persistence::HistoryStore;
use crate::risk::{BusinessCircuit, RiskPass, RiskScoreCalculator};
use crate::types::DataDomain;

/// Source of market snapshots and data-quality status
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Fresh snapshot, or the cached one while its TTL holds
    async fn latest_snapshot(&self) -> Arc<MarketSnapshot>;

    fn status(&self) -> AggregatorStatus;
}

/// Downstream consumer invoked after every published pass
pub type UpdateCallback = Arc<dyn Fn(&RiskPass) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub interval: Duration,
    /// Upper bound for one whole cycle
    pub cycle_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            cycle_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorStats {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub halted_cycles: u64,
    pub persistence_failures: u64,
    pub callback_failures: u64,
    pub alert_failures: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_snapshot_id: Option<String>,
    pub last_error: Option<String>,
}

/// What the previous cycle reported, for change-only warnings
#[derive(Debug, Default)]
struct CycleMemory {
    day: Option<NaiveDate>,
    degraded: Vec<DataDomain>,
}

pub struct MonitorLoop {
    config: MonitorConfig,
    provider: Arc<dyn SnapshotProvider>,
    calculator: Arc<RiskScoreCalculator>,
    table: RiskTable,
    history: Option<Arc<dyn HistoryStore>>,
    alerts: Arc<dyn AlertSink>,
    callbacks: Vec<UpdateCallback>,
    stats: RwLock<MonitorStats>,
    memory: Mutex<CycleMemory>,
}

impl MonitorLoop {
    pub fn new(
        config: MonitorConfig,
        provider: Arc<dyn SnapshotProvider>,
        calculator: Arc<RiskScoreCalculator>,
        table: RiskTable,
    ) -> Self {
        Self {
            config,
            provider,
            calculator,
            table,
            history: None,
            alerts: Arc::new(LogAlertSink),
            callbacks: Vec::new(),
            stats: RwLock::new(MonitorStats::default()),
            memory: Mutex::new(CycleMemory::default()),
        }
    }

    pub fn with_history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_alert_sink(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn on_update(mut self, callback: UpdateCallback) -> Self {
        self.callbacks.push(callback);
        self
    }

    pub fn table(&self) -> &RiskTable {
        &self.table
    }

    pub fn provider(&self) -> &Arc<dyn SnapshotProvider> {
        &self.provider
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn update_stats(&self, f: impl FnOnce(&mut MonitorStats)) {
        let mut stats = self.stats.write().unwrap_or_else(|p| p.into_inner());
        f(&mut stats);
    }

    /// Spawn the loop on the configured interval
    pub fn start(self: Arc<Self>) -> ScheduledTask {
        let interval = self.config.interval;
        ScheduledTask::start("monitor", interval, move || {
            let monitor = Arc::clone(&self);
            async move { monitor.tick().await }
        })
    }

    /// One cycle bounded by `cycle_timeout`; failures are recorded, not returned
    pub async fn tick(&self) {
        let outcome = tokio::time::timeout(self.config.cycle_timeout, self.run_once())
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "cycle exceeded {}ms",
                    self.config.cycle_timeout.as_millis()
                )
            })
            .and_then(|r| r);

        match outcome {
            Ok(pass) => self.update_stats(|s| {
                s.cycles += 1;
                s.last_cycle_at = Some(Utc::now());
                s.last_snapshot_id = Some(pass.snapshot_id.clone());
                if pass.circuit.is_halted() {
                    s.halted_cycles += 1;
                }
            }),
            Err(e) => {
                error!(error = %e, "❌ Monitor cycle failed");
                self.update_stats(|s| {
                    s.cycles += 1;
                    s.failed_cycles += 1;
                    s.last_cycle_at = Some(Utc::now());
                    s.last_error = Some(format!("{:#}", e));
                });
            }
        }
    }

    /// Run one cycle and return the published pass.
    ///
    /// A snapshot that is already published is not recomputed.
    pub async fn run_once(&self) -> Result<Arc<RiskPass>> {
        let snapshot = self.provider.latest_snapshot().await;

        if let Some(current) = self.table.current() {
            if current.snapshot_id == snapshot.snapshot_id {
                return Ok(current);
            }
        }

        let pass = Arc::new(self.calculator.compute_all(Arc::clone(&snapshot)).await);
        if pass.products.is_empty() {
            anyhow::bail!("risk pass over {} produced no products", snapshot.snapshot_id);
        }

        self.persist(&pass).await;
        self.table.publish(Arc::clone(&pass));

        let published: &RiskPass = &pass;
        for callback in &self.callbacks {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| callback(published)));
            if result.is_err() {
                warn!(snapshot_id = %pass.snapshot_id, "Update callback panicked");
                self.update_stats(|s| s.callback_failures += 1);
            }
        }

        for alert in self.alerts_for(&snapshot, &pass) {
            if let Err(e) = self.alerts.send(alert).await {
                warn!(error = %e, "Alert delivery failed");
                self.update_stats(|s| s.alert_failures += 1);
            }
        }

        info!(
            snapshot_id = %pass.snapshot_id,
            priced = pass.summary.priced,
            degraded = pass.summary.degraded,
            halted = pass.circuit.is_halted(),
            "🔄 Risk table published"
        );
        Ok(pass)
    }

    async fn persist(&self, pass: &RiskPass) {
        let Some(history) = &self.history else {
            return;
        };

        let appended = history
            .append_risk_pass(pass)
            .await
            .with_context(|| format!("append risk pass {}", pass.snapshot_id));
        if let Err(e) = appended {
            warn!(error = %format!("{:#}", e), "Risk history append failed");
            self.update_stats(|s| s.persistence_failures += 1);
        }

        let today = pass.computed_at.date_naive();
        let finished_day = {
            let mut memory = self.memory.lock().unwrap_or_else(|p| p.into_inner());
            match memory.day.replace(today) {
                Some(previous) if previous < today => Some(previous),
                _ => None,
            }
        };
        if let Some(day) = finished_day {
            match history.close_day(day).await {
                Ok(rows) => info!(date = %day, products = rows, "📅 Closed history day"),
                Err(e) => {
                    warn!(date = %day, error = %format!("{:#}", e), "Daily roll-up failed");
                    self.update_stats(|s| s.persistence_failures += 1);
                }
            }
        }
    }

    fn alerts_for(&self, snapshot: &MarketSnapshot, pass: &RiskPass) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let make = |severity, title: &str, message: String| Alert {
            severity,
            title: title.to_string(),
            message,
            snapshot_id: pass.snapshot_id.clone(),
            timestamp: pass.computed_at,
        };

        if let BusinessCircuit::Halt { message, affected, .. } = &pass.circuit {
            alerts.push(make(
                AlertSeverity::Critical,
                "Business circuit breaker tripped",
                format!("{} ({} products)", message, affected.len()),
            ));
        }

        for price_alert in &snapshot.price_alerts {
            if price_alert.kind == PriceAlertKind::CircuitOpen {
                alerts.push(make(
                    AlertSeverity::Critical,
                    "Consensus circuit open",
                    price_alert.message.clone(),
                ));
            }
        }

        let mut memory = self.memory.lock().unwrap_or_else(|p| p.into_inner());
        if memory.degraded != snapshot.degraded_domains {
            if !snapshot.degraded_domains.is_empty() {
                let domains: Vec<String> =
                    snapshot.degraded_domains.iter().map(|d| d.to_string()).collect();
                alerts.push(make(
                    AlertSeverity::Warning,
                    "Degraded market data",
                    format!(
                        "domains unavailable: {} ({}/{} sources failed)",
                        domains.join(", "),
                        snapshot.data_quality.failed_sources,
                        snapshot.data_quality.total_sources
                    ),
                ));
            }
            memory.degraded = snapshot.degraded_domains.clone();
        }
        alerts
    }
}
