//! Dashboard API response types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregator::AggregatorStatus;
use crate::circuit_breaker::BreakerPosition;
use crate::monitor::{MonitorStats, RiskUpdate};
use crate::risk::{BusinessCircuit, FleetSummary, ProductRisk, RiskPass};
use crate::types::DataDomain;

/// Full risk table as served by `/api/risk`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskTableResponse {
    pub snapshot_id: String,
    pub computed_at: DateTime<Utc>,
    pub summary: FleetSummary,
    pub circuit: BusinessCircuit,
    pub products: Vec<ProductRisk>,
}

impl From<&RiskPass> for RiskTableResponse {
    fn from(pass: &RiskPass) -> Self {
        Self {
            snapshot_id: pass.snapshot_id.clone(),
            computed_at: pass.computed_at,
            summary: pass.summary.clone(),
            circuit: pass.circuit.clone(),
            products: pass.products.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub aggregator: AggregatorStatus,
    pub monitor: MonitorStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// No risk pass published yet
    Starting,
    Ok,
    /// Some domains or sources unavailable; pricing continues
    Degraded,
    /// Business circuit breaker tripped
    Halted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthState,
    pub last_snapshot_id: Option<String>,
    pub last_snapshot_at: Option<DateTime<Utc>>,
    pub snapshot_age_secs: Option<i64>,
    pub degraded_domains: Vec<DataDomain>,
    pub open_breakers: Vec<String>,
    pub cycles: u64,
    pub failed_cycles: u64,
}

impl HealthResponse {
    pub fn build(
        aggregator: &AggregatorStatus,
        monitor: &MonitorStats,
        halted: Option<bool>,
        now: DateTime<Utc>,
    ) -> Self {
        let open_breakers: Vec<String> = aggregator
            .breakers
            .iter()
            .filter(|b| b.state != BreakerPosition::Closed)
            .map(|b| b.source.clone())
            .collect();

        let status = match halted {
            None => HealthState::Starting,
            Some(true) => HealthState::Halted,
            Some(false) if !aggregator.degraded_domains.is_empty() || !open_breakers.is_empty() => {
                HealthState::Degraded
            }
            Some(false) => HealthState::Ok,
        };

        Self {
            status,
            last_snapshot_id: aggregator.last_snapshot_id.clone(),
            last_snapshot_at: aggregator.last_snapshot_at,
            snapshot_age_secs: aggregator.last_snapshot_at.map(|t| (now - t).num_seconds()),
            degraded_domains: aggregator.degraded_domains.clone(),
            open_breakers,
            cycles: monitor.cycles,
            failed_cycles: monitor.failed_cycles,
        }
    }
}

/// Messages pushed over `/ws`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    /// Sent on connect when a table exists
    FullState(RiskTableResponse),
    /// A new pass was published
    RiskUpdate(RiskUpdate),
    Heartbeat(i64),
}

/// Generic API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
