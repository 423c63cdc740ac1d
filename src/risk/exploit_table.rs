//! Exploit-frequency table: `(protocol type, chain) -> multiplier`
//!
//! Loaded from YAML when a path is configured:
//!
//! ```yaml
//! entries:
//!   - protocol_type: bridge
//!     chain: bsc
//!     multiplier: 1.40
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::types::{Chain, CoverageType, ProtocolType};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExploitEntry {
    protocol_type: ProtocolType,
    chain: String,
    multiplier: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ExploitTableFile {
    #[serde(default)]
    entries: Vec<ExploitEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct ExploitTable {
    entries: HashMap<(ProtocolType, Chain), f64>,
}

impl ExploitTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Table used when no file is configured
    pub fn builtin() -> Self {
        let mut table = Self::empty();
        table.insert(ProtocolType::Bridge, Chain::Bsc, 1.40);
        table.insert(ProtocolType::Bridge, Chain::Polygon, 1.30);
        table.insert(ProtocolType::Bridge, Chain::Avalanche, 1.25);
        table.insert(ProtocolType::Lending, Chain::Bsc, 1.25);
        table.insert(ProtocolType::Lending, Chain::Ethereum, 1.05);
        table.insert(ProtocolType::Oracle, Chain::Bsc, 1.30);
        table.insert(ProtocolType::Oracle, Chain::Polygon, 1.20);
        table
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let file: ExploitTableFile =
            serde_yaml::from_str(raw).context("Failed to parse exploit table")?;

        let mut table = Self::empty();
        for entry in file.entries {
            let chain = Chain::from_str(&entry.chain)
                .with_context(|| format!("Unknown chain in exploit table: {}", entry.chain))?;
            if !entry.multiplier.is_finite() || entry.multiplier <= 0.0 {
                anyhow::bail!(
                    "Invalid exploit multiplier {} for {:?}/{}",
                    entry.multiplier,
                    entry.protocol_type,
                    chain
                );
            }
            table.insert(entry.protocol_type, chain, entry.multiplier);
        }
        Ok(table)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read exploit table {}", path.display()))?;
        let table = Self::from_yaml_str(&raw)?;
        tracing::info!(path = %path.display(), entries = table.len(), "Loaded exploit table");
        Ok(table)
    }

    pub fn insert(&mut self, protocol_type: ProtocolType, chain: Chain, multiplier: f64) {
        self.entries.insert((protocol_type, chain), multiplier);
    }

    pub fn lookup(&self, protocol_type: ProtocolType, chain: Chain) -> Option<f64> {
        self.entries.get(&(protocol_type, chain)).copied()
    }

    /// Table entry for the coverage's protocol class, or the coverage default
    pub fn factor(&self, coverage_type: CoverageType, chain: Chain) -> f64 {
        self.lookup(coverage_type.protocol_type(), chain)
            .unwrap_or_else(|| coverage_type.default_exploit_factor())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
