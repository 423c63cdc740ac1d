//! Source clients for the four signal domains
//!
//! - prices: Binance, Coinbase, Pyth
//! - bridge health: DeFiLlama bridges
//! - liquidations: OKX public liquidation orders
//! - congestion: EVM JSON-RPC `eth_feeHistory`
//!
//! Each client returns typed readings or a [`SourceError`]; none of them
//! shares state with another.

mod binance;
mod coinbase;
mod defillama;
mod evm_rpc;
mod http;
mod okx;
mod pyth;

pub use binance::BinanceClient;
pub use coinbase::CoinbaseClient;
pub use defillama::DefiLlamaBridgeClient;
pub use evm_rpc::EvmCongestionClient;
pub use http::JsonHttp;
pub use okx::{OkxLiquidationClient, StressThresholds};
pub use pyth::PythClient;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::oracle::{BridgeHealth, ChainCongestion, LiquidationAggregate, PriceReading};
use crate::types::{Chain, Stablecoin};

/// A stablecoin price provider
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Source id used for breaker keys, weights and CSV rows
    fn name(&self) -> &'static str;

    /// Fetch the latest reading for each supported asset in `assets`.
    /// Unsupported assets are skipped, not reported as errors.
    async fn fetch_prices(&self, assets: &[Stablecoin]) -> Result<Vec<PriceReading>, SourceError>;
}

/// A bridge-health / TVL provider
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BridgeHealthFeed: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch_bridge_health(&self, chains: &[Chain]) -> Result<Vec<BridgeHealth>, SourceError>;
}

/// An exchange liquidation provider
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LiquidationFeed: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch_liquidations(&self) -> Result<LiquidationAggregate, SourceError>;
}

/// A chain congestion provider
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CongestionFeed: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch_congestion(&self, chains: &[Chain]) -> Result<Vec<ChainCongestion>, SourceError>;
}
