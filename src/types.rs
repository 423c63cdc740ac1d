//! Core types used throughout RiskOracle
//!
//! Defines the product catalog dimensions (coverage type, chain, stablecoin),
//! risk tiers, market stress levels and the data domains fed into a snapshot.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Monitored stablecoins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stablecoin {
    USDC,
    USDT,
    DAI,
    FRAX,
    PYUSD,
    USDe,
    FDUSD,
}

impl Stablecoin {
    pub const ALL: [Stablecoin; 7] = [
        Stablecoin::USDC,
        Stablecoin::USDT,
        Stablecoin::DAI,
        Stablecoin::FRAX,
        Stablecoin::PYUSD,
        Stablecoin::USDe,
        Stablecoin::FDUSD,
    ];

    /// Ticker symbol as used in logs, CSV rows and config keys
    pub fn symbol(&self) -> &'static str {
        match self {
            Stablecoin::USDC => "USDC",
            Stablecoin::USDT => "USDT",
            Stablecoin::DAI => "DAI",
            Stablecoin::FRAX => "FRAX",
            Stablecoin::PYUSD => "PYUSD",
            Stablecoin::USDe => "USDe",
            Stablecoin::FDUSD => "FDUSD",
        }
    }

    /// Binance spot pair quoted in USDT. USDT itself has no such pair.
    pub fn binance_symbol(&self) -> Option<&'static str> {
        match self {
            Stablecoin::USDC => Some("USDCUSDT"),
            Stablecoin::FDUSD => Some("FDUSDUSDT"),
            Stablecoin::USDe => Some("USDEUSDT"),
            Stablecoin::DAI => Some("DAIUSDT"),
            _ => None,
        }
    }

    /// Coinbase Exchange product id quoted in USD
    pub fn coinbase_product(&self) -> Option<&'static str> {
        match self {
            Stablecoin::USDT => Some("USDT-USD"),
            Stablecoin::DAI => Some("DAI-USD"),
            Stablecoin::PYUSD => Some("PYUSD-USD"),
            _ => None,
        }
    }

    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "USDC" => Some(Stablecoin::USDC),
            "USDT" => Some(Stablecoin::USDT),
            "DAI" => Some(Stablecoin::DAI),
            "FRAX" => Some(Stablecoin::FRAX),
            "PYUSD" => Some(Stablecoin::PYUSD),
            "USDE" => Some(Stablecoin::USDe),
            "FDUSD" => Some(Stablecoin::FDUSD),
            _ => None,
        }
    }
}

impl fmt::Display for Stablecoin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Monitored chains (all EVM, congestion is read via `eth_feeHistory`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Chain {
    Ethereum,
    Arbitrum,
    Base,
    Optimism,
    Polygon,
    Bsc,
    Avalanche,
}

impl Chain {
    pub const ALL: [Chain; 7] = [
        Chain::Ethereum,
        Chain::Arbitrum,
        Chain::Base,
        Chain::Optimism,
        Chain::Polygon,
        Chain::Bsc,
        Chain::Avalanche,
    ];

    /// Lowercase key used in config maps and CSV rows
    pub fn key(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Arbitrum => "arbitrum",
            Chain::Base => "base",
            Chain::Optimism => "optimism",
            Chain::Polygon => "polygon",
            Chain::Bsc => "bsc",
            Chain::Avalanche => "avalanche",
        }
    }

    /// Parse from a config key or a DeFiLlama chain label
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ethereum" | "eth" => Some(Chain::Ethereum),
            "arbitrum" | "arbitrum one" => Some(Chain::Arbitrum),
            "base" => Some(Chain::Base),
            "optimism" | "op mainnet" => Some(Chain::Optimism),
            "polygon" | "matic" => Some(Chain::Polygon),
            "bsc" | "bnb" | "bnb chain" => Some(Chain::Bsc),
            "avalanche" | "avax" => Some(Chain::Avalanche),
            _ => None,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Sellable coverage types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CoverageType {
    Depeg,
    SmartContract,
    Oracle,
    Bridge,
    CexLiquidation,
}

impl CoverageType {
    pub const ALL: [CoverageType; 5] = [
        CoverageType::Depeg,
        CoverageType::SmartContract,
        CoverageType::Oracle,
        CoverageType::Bridge,
        CoverageType::CexLiquidation,
    ];

    /// Fixed annual base rate for this coverage type
    pub fn base_rate(&self) -> f64 {
        match self {
            CoverageType::Depeg => 0.008,
            CoverageType::SmartContract => 0.012,
            CoverageType::Oracle => 0.010,
            CoverageType::Bridge => 0.015,
            CoverageType::CexLiquidation => 0.020,
        }
    }

    /// Protocol class whose exploit history drives this coverage
    pub fn protocol_type(&self) -> ProtocolType {
        match self {
            CoverageType::Depeg => ProtocolType::Stablecoin,
            CoverageType::SmartContract => ProtocolType::Lending,
            CoverageType::Oracle => ProtocolType::Oracle,
            CoverageType::Bridge => ProtocolType::Bridge,
            CoverageType::CexLiquidation => ProtocolType::Exchange,
        }
    }

    /// Exploit factor used when the exploit table has no entry
    pub fn default_exploit_factor(&self) -> f64 {
        match self {
            CoverageType::Depeg => 1.00,
            CoverageType::SmartContract => 1.10,
            CoverageType::Oracle => 1.15,
            CoverageType::Bridge => 1.20,
            CoverageType::CexLiquidation => 1.05,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            CoverageType::Depeg => "depeg",
            CoverageType::SmartContract => "smart_contract",
            CoverageType::Oracle => "oracle",
            CoverageType::Bridge => "bridge",
            CoverageType::CexLiquidation => "cex_liquidation",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "depeg" => Some(CoverageType::Depeg),
            "smart_contract" | "smartcontract" => Some(CoverageType::SmartContract),
            "oracle" => Some(CoverageType::Oracle),
            "bridge" => Some(CoverageType::Bridge),
            "cex_liquidation" | "cexliquidation" => Some(CoverageType::CexLiquidation),
            _ => None,
        }
    }
}

impl fmt::Display for CoverageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Protocol classes tracked in the exploit-frequency table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolType {
    Stablecoin,
    Lending,
    Oracle,
    Bridge,
    Exchange,
}

/// Identity of one sellable product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProductKey {
    pub coverage_type: CoverageType,
    pub chain: Chain,
    pub stablecoin: Stablecoin,
}

impl ProductKey {
    pub fn new(coverage_type: CoverageType, chain: Chain, stablecoin: Stablecoin) -> Self {
        Self {
            coverage_type,
            chain,
            stablecoin,
        }
    }
}

impl fmt::Display for ProductKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.coverage_type, self.chain, self.stablecoin)
    }
}

/// The fixed product catalog: coverage types × chains × stablecoins
#[derive(Debug, Clone)]
pub struct ProductCatalog {
    products: Vec<ProductKey>,
}

impl ProductCatalog {
    /// Enumerate the full cross product once
    pub fn full() -> Self {
        let mut products =
            Vec::with_capacity(CoverageType::ALL.len() * Chain::ALL.len() * Stablecoin::ALL.len());
        for coverage_type in CoverageType::ALL {
            for chain in Chain::ALL {
                for stablecoin in Stablecoin::ALL {
                    products.push(ProductKey::new(coverage_type, chain, stablecoin));
                }
            }
        }
        Self { products }
    }

    pub fn products(&self) -> &[ProductKey] {
        &self.products
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn contains(&self, key: &ProductKey) -> bool {
        self.products.contains(key)
    }
}

impl Default for ProductCatalog {
    fn default() -> Self {
        Self::full()
    }
}

/// Coarse classification of a product's risk multiplier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskTier {
    Normal,
    Elevated,
    High,
    Extreme,
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskTier::Normal => write!(f, "NORMAL"),
            RiskTier::Elevated => write!(f, "ELEVATED"),
            RiskTier::High => write!(f, "HIGH"),
            RiskTier::Extreme => write!(f, "EXTREME"),
        }
    }
}

/// Categorical exchange liquidation stress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MarketStressLevel {
    Normal,
    Elevated,
    High,
    Extreme,
}

impl Default for MarketStressLevel {
    fn default() -> Self {
        MarketStressLevel::Normal
    }
}

impl fmt::Display for MarketStressLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketStressLevel::Normal => write!(f, "NORMAL"),
            MarketStressLevel::Elevated => write!(f, "ELEVATED"),
            MarketStressLevel::High => write!(f, "HIGH"),
            MarketStressLevel::Extreme => write!(f, "EXTREME"),
        }
    }
}

/// The four external signal domains merged into a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataDomain {
    Prices,
    BridgeHealth,
    Liquidations,
    Congestion,
}

impl DataDomain {
    pub const ALL: [DataDomain; 4] = [
        DataDomain::Prices,
        DataDomain::BridgeHealth,
        DataDomain::Liquidations,
        DataDomain::Congestion,
    ];
}

impl fmt::Display for DataDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataDomain::Prices => write!(f, "prices"),
            DataDomain::BridgeHealth => write!(f, "bridge_health"),
            DataDomain::Liquidations => write!(f, "liquidations"),
            DataDomain::Congestion => write!(f, "congestion"),
        }
    }
}
