//! RiskOracle Library
//!
//! Off-chain risk data plane for parametric coverage: multi-feed price
//! consensus, validated market snapshots and per-product risk multipliers.

pub mod aggregator;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod monitor;
pub mod oracle;
pub mod persistence;
pub mod retry;
pub mod risk;
pub mod types;

#[cfg(feature = "dashboard")]
pub mod dashboard;
