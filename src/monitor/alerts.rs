//! Operator alerts raised by the monitor loop

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Warning => write!(f, "WARNING"),
            AlertSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub snapshot_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Destination for operator alerts (pager, chat webhook, log)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: Alert) -> Result<()>;
}

/// Writes alerts to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send(&self, alert: Alert) -> Result<()> {
        match alert.severity {
            AlertSeverity::Critical => tracing::error!(
                snapshot_id = %alert.snapshot_id,
                "🚨 {}: {}",
                alert.title,
                alert.message
            ),
            AlertSeverity::Warning => tracing::warn!(
                snapshot_id = %alert.snapshot_id,
                "⚠️ {}: {}",
                alert.title,
                alert.message
            ),
        }
        Ok(())
    }
}
