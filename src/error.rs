//! Error kinds for the pricing data plane
//!
//! Source, consensus and validation failures are typed so callers can tell an
//! unavailable feed apart from a tripped breaker or a rejected value.
//! Persistence and composition errors travel as `anyhow::Error`.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::Stablecoin;

/// Failure of one external source call
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SourceError {
    #[error("{source_name} unavailable: {reason}")]
    Unavailable { source_name: String, reason: String },

    #[error("{source_name} timed out after {after_ms}ms")]
    Timeout { source_name: String, after_ms: u64 },

    #[error("{source_name} returned HTTP {status}")]
    HttpStatus { source_name: String, status: u16 },

    #[error("{source_name} returned an invalid response: {reason}")]
    InvalidResponse { source_name: String, reason: String },

    #[error("circuit open for {source_name} until {retry_at}")]
    CircuitOpen {
        source_name: String,
        retry_at: DateTime<Utc>,
    },
}

impl SourceError {
    /// Whether another attempt inside the same retry budget may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::Unavailable { .. } | SourceError::Timeout { .. } => true,
            SourceError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            SourceError::InvalidResponse { .. } | SourceError::CircuitOpen { .. } => false,
        }
    }

    pub fn source_name(&self) -> &str {
        match self {
            SourceError::Unavailable { source_name, .. }
            | SourceError::Timeout { source_name, .. }
            | SourceError::HttpStatus { source_name, .. }
            | SourceError::InvalidResponse { source_name, .. }
            | SourceError::CircuitOpen { source_name, .. } => source_name,
        }
    }

    pub fn unavailable(source_name: &str, reason: impl Into<String>) -> Self {
        SourceError::Unavailable {
            source_name: source_name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid(source_name: &str, reason: impl Into<String>) -> Self {
        SourceError::InvalidResponse {
            source_name: source_name.to_string(),
            reason: reason.into(),
        }
    }

    /// Map a transport error from reqwest onto the source error kinds
    pub fn from_reqwest(source_name: &str, err: reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            SourceError::Timeout {
                source_name: source_name.to_string(),
                after_ms: timeout_ms,
            }
        } else if let Some(status) = err.status() {
            SourceError::HttpStatus {
                source_name: source_name.to_string(),
                status: status.as_u16(),
            }
        } else if err.is_decode() {
            SourceError::invalid(source_name, err.to_string())
        } else {
            SourceError::unavailable(source_name, err.to_string())
        }
    }
}

/// Why a fresh consensus was not applied for an asset
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConsensusError {
    #[error("insufficient consensus for {asset}: {available} usable readings, need {required}")]
    InsufficientConsensus {
        asset: Stablecoin,
        required: usize,
        available: usize,
    },

    #[error(
        "excessive deviation for {asset}: {proposed:.6} vs previous {previous:.6} ({change_pct:.2}% > {threshold_pct:.2}%)"
    )]
    ExcessiveDeviation {
        asset: Stablecoin,
        previous: f64,
        proposed: f64,
        change_pct: f64,
        threshold_pct: f64,
    },
}

impl ConsensusError {
    /// The engine's own breaker tripped on an erratic update
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ConsensusError::ExcessiveDeviation { .. })
    }

    pub fn asset(&self) -> Stablecoin {
        match self {
            ConsensusError::InsufficientConsensus { asset, .. }
            | ConsensusError::ExcessiveDeviation { asset, .. } => *asset,
        }
    }
}

/// A value dropped by the aggregator's validation stage
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationFailure {
    #[error("{metric} is not a finite number")]
    NotFinite { metric: String },

    #[error("{metric}={value} outside [{min}, {max}]")]
    OutOfBounds {
        metric: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{metric}={value} anomalous (z={zscore:.2}, threshold {threshold:.2})")]
    Anomalous {
        metric: String,
        value: f64,
        zscore: f64,
        threshold: f64,
    },
}
