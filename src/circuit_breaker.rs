//! Per-source circuit breaker
//!
//! Closed and HalfOpen permit calls. Open blocks calls until the cooldown has
//! elapsed, then moves to HalfOpen for a single trial call: a success closes
//! the breaker, a failure re-opens it. Each breaker belongs to exactly one
//! logical source and is only mutated by that source's call path.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SourceError;

/// Breaker position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerPosition {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerPosition::Closed => write!(f, "CLOSED"),
            BreakerPosition::Open => write!(f, "OPEN"),
            BreakerPosition::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Breaker tuning
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that open a closed breaker
    pub failure_threshold: u32,
    /// How long an open breaker blocks calls
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::seconds(60),
        }
    }
}

/// Observable state of one breaker, as reported by the status query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub source: String,
    pub state: BreakerPosition,
    pub failure_count: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub total_failures: u64,
    pub total_successes: u64,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    source: String,
    config: BreakerConfig,
    position: BreakerPosition,
    failure_count: u32,
    last_failure: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    total_failures: u64,
    total_successes: u64,
}

impl CircuitBreaker {
    pub fn new(source: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            source: source.into(),
            config,
            position: BreakerPosition::Closed,
            failure_count: 0,
            last_failure: None,
            opened_at: None,
            total_failures: 0,
            total_successes: 0,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn position(&self) -> BreakerPosition {
        self.position
    }

    /// Gate a call at `now`. An open breaker whose cooldown has elapsed moves
    /// to HalfOpen and lets the trial call through.
    pub fn check_circuit(&mut self, now: DateTime<Utc>) -> Result<(), SourceError> {
        match self.position {
            BreakerPosition::Closed | BreakerPosition::HalfOpen => Ok(()),
            BreakerPosition::Open => {
                let opened_at = self.opened_at.unwrap_or(now);
                let retry_at = opened_at + self.config.cooldown;
                if now >= retry_at {
                    tracing::info!(source = %self.source, "Circuit half-open, allowing trial call");
                    self.position = BreakerPosition::HalfOpen;
                    Ok(())
                } else {
                    Err(SourceError::CircuitOpen {
                        source_name: self.source.clone(),
                        retry_at,
                    })
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        if self.position != BreakerPosition::Closed {
            tracing::info!(source = %self.source, "✅ Circuit closed after successful call");
        }
        self.position = BreakerPosition::Closed;
        self.failure_count = 0;
        self.opened_at = None;
        self.total_successes += 1;
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.failure_count += 1;
        self.total_failures += 1;
        self.last_failure = Some(now);

        let should_open = match self.position {
            BreakerPosition::HalfOpen => true,
            BreakerPosition::Closed => self.failure_count >= self.config.failure_threshold,
            BreakerPosition::Open => false,
        };

        if should_open {
            tracing::warn!(
                source = %self.source,
                failures = self.failure_count,
                cooldown_secs = self.config.cooldown.num_seconds(),
                "⚠️ Circuit opened"
            );
            self.position = BreakerPosition::Open;
            self.opened_at = Some(now);
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        CircuitBreakerState {
            source: self.source.clone(),
            state: self.position,
            failure_count: self.failure_count,
            last_failure: self.last_failure,
            opened_at: self.opened_at,
            total_failures: self.total_failures,
            total_successes: self.total_successes,
        }
    }
}
