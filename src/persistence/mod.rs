//! CSV Persistence Module
//!
//! Append-only, daily-partitioned history of snapshots and risk multipliers:
//!
//! ```text
//! data_dir/
//!   prices/prices_YYYY-MM-DD.csv          one row per consensus price
//!   readings/readings_YYYY-MM-DD.csv      one row per raw provider reading
//!   bridges/bridges_YYYY-MM-DD.csv        one row per bridge health reading
//!   congestion/congestion_YYYY-MM-DD.csv  one row per chain congestion reading
//!   snapshots/snapshots_YYYY-MM-DD.csv    one row per snapshot
//!   multipliers/multipliers_YYYY-MM-DD.csv one row per product per risk pass
//!   rollups/multipliers_rollup_YYYY-MM-DD.csv
//! ```
//!
//! Rows are partitioned by their cycle timestamp. Re-appending a snapshot id
//! that is already recorded is a no-op.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use csv::{ReaderBuilder, WriterBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::RwLock as AsyncRwLock;
use tracing::{info, warn};

use crate::aggregator::{MarketSnapshot, ReadingOutcome};
use crate::risk::{ProductRisk, RiskPass};
use crate::types::{ProductKey, Stablecoin};

/// Snapshot ids remembered for de-duplication
const RECORDED_ID_CAPACITY: usize = 10_000;

/// Durable history sink used by the aggregator and the monitor loop
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append one snapshot. Returns `false` if its id was already recorded.
    async fn append_snapshot(&self, snapshot: &MarketSnapshot) -> Result<bool>;

    /// Append the raw provider readings behind `snapshot`, accepted or not
    async fn append_readings(&self, snapshot: &MarketSnapshot, readings: &[ReadingOutcome]) -> Result<usize>;

    /// Append one row per product. Returns the number of rows written.
    async fn append_risk_pass(&self, pass: &RiskPass) -> Result<usize>;

    /// Called once after the last pass of `date`
    async fn close_day(&self, date: NaiveDate) -> Result<usize>;
}

/// Consensus price row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub timestamp: i64,
    pub snapshot_id: String,
    pub asset: String,
    pub price: f64,
    pub confidence: f64,
    pub deviation: f64,
    pub source_count: usize,
    pub sources: String,
}

/// Raw provider reading; `timestamp` is the cycle, `reading_timestamp` the source's own
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingRecord {
    pub timestamp: i64,
    pub snapshot_id: String,
    pub source: String,
    pub asset: String,
    pub price: f64,
    pub confidence: f64,
    pub reading_timestamp: i64,
    pub accepted: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeRecord {
    pub timestamp: i64,
    pub snapshot_id: String,
    pub bridge: String,
    pub chain: String,
    pub health_score: f64,
    pub daily_volume_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CongestionRecord {
    pub timestamp: i64,
    pub snapshot_id: String,
    pub chain: String,
    pub congestion_score: f64,
    pub gas_used_ratio: f64,
    pub base_fee_gwei: f64,
}

/// One row per snapshot, liquidation aggregate and data quality inlined
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub timestamp: i64,
    pub snapshot_id: String,
    pub prices: usize,
    pub bridges: usize,
    pub congestion: usize,
    pub liquidation_total_usd: f64,
    pub stress_level: String,
    pub degraded_domains: String,
    pub total_sources: usize,
    pub successful_sources: usize,
    pub failed_sources: usize,
    pub anomalies_detected: usize,
    pub cache_hit_rate: f64,
}

/// One product's outcome in one risk pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiplierRecord {
    pub timestamp: i64,
    pub snapshot_id: String,
    pub coverage_type: String,
    pub chain: String,
    pub stablecoin: String,
    pub status: String,
    pub base_rate: Option<f64>,
    pub price_depeg_factor: Option<f64>,
    pub bridge_health_factor: Option<f64>,
    pub chain_congestion_factor: Option<f64>,
    pub exploit_frequency_factor: Option<f64>,
    pub liquidation_stress_factor: Option<f64>,
    pub final_multiplier: Option<f64>,
    pub risk_tier: Option<String>,
    pub missing_inputs: String,
    pub reason: Option<String>,
}

impl MultiplierRecord {
    pub fn from_risk(risk: &ProductRisk, snapshot_id: &str, timestamp: DateTime<Utc>) -> Self {
        let product = risk.product();
        let mut record = MultiplierRecord {
            timestamp: timestamp.timestamp_millis(),
            snapshot_id: snapshot_id.to_string(),
            coverage_type: product.coverage_type.key().to_string(),
            chain: product.chain.key().to_string(),
            stablecoin: product.stablecoin.symbol().to_string(),
            status: "degraded".to_string(),
            base_rate: None,
            price_depeg_factor: None,
            bridge_health_factor: None,
            chain_congestion_factor: None,
            exploit_frequency_factor: None,
            liquidation_stress_factor: None,
            final_multiplier: None,
            risk_tier: None,
            missing_inputs: String::new(),
            reason: None,
        };
        match risk {
            ProductRisk::Priced(b) => {
                record.status = "priced".to_string();
                record.base_rate = Some(b.base_rate);
                record.price_depeg_factor = Some(b.price_depeg_factor);
                record.bridge_health_factor = Some(b.bridge_health_factor);
                record.chain_congestion_factor = Some(b.chain_congestion_factor);
                record.exploit_frequency_factor = Some(b.exploit_frequency_factor);
                record.liquidation_stress_factor = Some(b.liquidation_stress_factor);
                record.final_multiplier = Some(b.final_multiplier);
                record.risk_tier = Some(b.risk_tier.to_string());
            }
            ProductRisk::Degraded {
                reason,
                missing_inputs,
                ..
            } => {
                record.reason = Some(reason.clone());
                record.missing_inputs = join(missing_inputs.iter());
            }
        }
        record
    }

    fn matches(&self, product: &ProductKey) -> bool {
        self.coverage_type == product.coverage_type.key()
            && self.chain == product.chain.key()
            && self.stablecoin == product.stablecoin.symbol()
    }
}

/// Daily roll-up of one product's multipliers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiplierRollup {
    pub date: String,
    pub coverage_type: String,
    pub chain: String,
    pub stablecoin: String,
    pub samples: usize,
    pub degraded_samples: usize,
    pub mean_multiplier: Option<f64>,
    pub min_multiplier: Option<f64>,
    pub max_multiplier: Option<f64>,
    pub worst_tier: Option<String>,
}

fn join<T: std::fmt::Display>(items: impl Iterator<Item = T>) -> String {
    items.map(|i| i.to_string()).collect::<Vec<_>>().join("|")
}

fn tier_rank(tier: &str) -> u8 {
    match tier {
        "EXTREME" => 3,
        "HIGH" => 2,
        "ELEVATED" => 1,
        _ => 0,
    }
}

struct DailyWriter {
    date: NaiveDate,
    writer: csv::Writer<fs::File>,
}

/// Writer for one series, rolling over to a new file per day
struct SeriesWriter {
    dir: PathBuf,
    prefix: &'static str,
    current: AsyncRwLock<Option<DailyWriter>>,
}

impl SeriesWriter {
    fn new(dir: PathBuf, prefix: &'static str) -> Self {
        Self {
            dir,
            prefix,
            current: AsyncRwLock::new(None),
        }
    }

    fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}_{}.csv", self.prefix, date.format("%Y-%m-%d")))
    }

    async fn append<T: Serialize>(&self, date: NaiveDate, rows: &[T]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut slot = self.current.write().await;
        let daily = match slot.take() {
            Some(daily) if daily.date == date => daily,
            _ => DailyWriter {
                date,
                writer: CsvPersistence::create_writer(&self.file_for(date))?,
            },
        };
        let daily = slot.insert(daily);

        for row in rows {
            daily
                .writer
                .serialize(row)
                .with_context(|| format!("Failed to write {} record", self.prefix))?;
        }
        daily
            .writer
            .flush()
            .with_context(|| format!("Failed to flush {} writer", self.prefix))?;
        Ok(())
    }
}

/// Recently recorded ids, bounded
#[derive(Default)]
struct RecordedIds {
    set: HashSet<String>,
    order: VecDeque<String>,
}

impl RecordedIds {
    fn contains(&self, id: &str) -> bool {
        self.set.contains(id)
    }

    fn insert(&mut self, id: String) {
        if self.set.insert(id.clone()) {
            self.order.push_back(id);
        }
        while self.order.len() > RECORDED_ID_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
            }
        }
    }
}

/// CSV persistence manager
pub struct CsvPersistence {
    data_dir: PathBuf,
    price_writer: SeriesWriter,
    reading_writer: SeriesWriter,
    bridge_writer: SeriesWriter,
    congestion_writer: SeriesWriter,
    snapshot_writer: SeriesWriter,
    multiplier_writer: SeriesWriter,
    recorded_snapshots: Mutex<RecordedIds>,
    recorded_passes: Mutex<RecordedIds>,
}

impl CsvPersistence {
    /// Create a new CSV persistence manager rooted at `data_dir`
    pub fn new(data_dir: &str) -> Result<Self> {
        let data_dir = PathBuf::from(data_dir);
        fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
        for folder in ["prices", "readings", "bridges", "congestion", "snapshots", "multipliers", "rollups"] {
            fs::create_dir_all(data_dir.join(folder))
                .with_context(|| format!("Failed to create {} directory", folder))?;
        }

        let persistence = Self {
            price_writer: SeriesWriter::new(data_dir.join("prices"), "prices"),
            reading_writer: SeriesWriter::new(data_dir.join("readings"), "readings"),
            bridge_writer: SeriesWriter::new(data_dir.join("bridges"), "bridges"),
            congestion_writer: SeriesWriter::new(data_dir.join("congestion"), "congestion"),
            snapshot_writer: SeriesWriter::new(data_dir.join("snapshots"), "snapshots"),
            multiplier_writer: SeriesWriter::new(data_dir.join("multipliers"), "multipliers"),
            recorded_snapshots: Mutex::new(RecordedIds::default()),
            recorded_passes: Mutex::new(RecordedIds::default()),
            data_dir,
        };
        persistence.preload_recorded_ids(Utc::now().date_naive())?;
        Ok(persistence)
    }

    fn create_writer(path: &Path) -> Result<csv::Writer<fs::File>> {
        let file_has_data =
            path.exists() && fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

        let writer = WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file);

        Ok(writer)
    }

    /// Remember ids already on disk for `date` so a restart does not duplicate rows
    fn preload_recorded_ids(&self, date: NaiveDate) -> Result<()> {
        let snapshots: Vec<SnapshotRecord> = Self::read_file(&self.snapshot_writer.file_for(date))?;
        let multipliers: Vec<MultiplierRecord> =
            Self::read_file(&self.multiplier_writer.file_for(date))?;

        let mut recorded = self.recorded_snapshots.lock().unwrap_or_else(|p| p.into_inner());
        for record in &snapshots {
            recorded.insert(record.snapshot_id.clone());
        }
        let mut passes = self.recorded_passes.lock().unwrap_or_else(|p| p.into_inner());
        for record in &multipliers {
            passes.insert(record.snapshot_id.clone());
        }
        if !snapshots.is_empty() {
            info!(date = %date, snapshots = snapshots.len(), "Resuming history for today");
        }
        Ok(())
    }

    fn read_file<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
        let mut records = Vec::new();
        for result in reader.deserialize() {
            match result {
                Ok(record) => records.push(record),
                // A torn last line from a crash must not hide the rest of the day
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable CSV row"),
            }
        }
        Ok(records)
    }

    /// Rows of one series with `from <= timestamp <= to`
    fn load_range<T, F>(&self, folder: &str, from: DateTime<Utc>, to: DateTime<Utc>, timestamp: F) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> i64,
    {
        let (from_ms, to_ms) = (from.timestamp_millis(), to.timestamp_millis());
        let mut records = Vec::new();
        let mut day = from.date_naive();
        let last = to.date_naive();
        while day <= last {
            let path = self
                .data_dir
                .join(folder)
                .join(format!("{}_{}.csv", folder, day.format("%Y-%m-%d")));
            for record in Self::read_file::<T>(&path)? {
                let ts = timestamp(&record);
                if ts >= from_ms && ts <= to_ms {
                    records.push(record);
                }
            }
            day += Duration::days(1);
        }
        records.sort_by_key(|r| timestamp(r));
        Ok(records)
    }

    pub fn load_prices(&self, asset: Stablecoin, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<PriceRecord>> {
        let records: Vec<PriceRecord> = self.load_range("prices", from, to, |r: &PriceRecord| r.timestamp)?;
        Ok(records
            .into_iter()
            .filter(|r| r.asset == asset.symbol())
            .collect())
    }

    /// Raw readings by cycle time, optionally for one asset only
    pub fn load_readings(
        &self,
        asset: Option<Stablecoin>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ReadingRecord>> {
        let records: Vec<ReadingRecord> = self.load_range("readings", from, to, |r: &ReadingRecord| r.timestamp)?;
        Ok(match asset {
            Some(asset) => records
                .into_iter()
                .filter(|r| r.asset == asset.symbol())
                .collect(),
            None => records,
        })
    }

    pub fn load_snapshots(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<SnapshotRecord>> {
        self.load_range("snapshots", from, to, |r: &SnapshotRecord| r.timestamp)
    }

    /// Multiplier rows in range, optionally for one product only
    pub fn load_multipliers(
        &self,
        product: Option<&ProductKey>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MultiplierRecord>> {
        let records: Vec<MultiplierRecord> =
            self.load_range("multipliers", from, to, |r: &MultiplierRecord| r.timestamp)?;
        Ok(match product {
            Some(product) => records.into_iter().filter(|r| r.matches(product)).collect(),
            None => records,
        })
    }

    /// Per-product mean/min/max multiplier for one day
    pub fn daily_rollup(&self, date: NaiveDate) -> Result<Vec<MultiplierRollup>> {
        let records: Vec<MultiplierRecord> = Self::read_file(&self.multiplier_writer.file_for(date))?;

        let mut groups: BTreeMap<(String, String, String), Vec<&MultiplierRecord>> = BTreeMap::new();
        for record in &records {
            groups
                .entry((
                    record.coverage_type.clone(),
                    record.chain.clone(),
                    record.stablecoin.clone(),
                ))
                .or_default()
                .push(record);
        }

        let date_label = date.format("%Y-%m-%d").to_string();
        Ok(groups
            .into_iter()
            .map(|((coverage_type, chain, stablecoin), rows)| {
                let values: Vec<f64> = rows.iter().filter_map(|r| r.final_multiplier).collect();
                let worst_tier = rows
                    .iter()
                    .filter_map(|r| r.risk_tier.as_deref())
                    .max_by_key(|t| tier_rank(t))
                    .map(str::to_string);
                let (mean, min, max) = if values.is_empty() {
                    (None, None, None)
                } else {
                    (
                        Some(values.iter().sum::<f64>() / values.len() as f64),
                        Some(values.iter().copied().fold(f64::INFINITY, f64::min)),
                        Some(values.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
                    )
                };
                MultiplierRollup {
                    date: date_label.clone(),
                    coverage_type,
                    chain,
                    stablecoin,
                    samples: rows.len(),
                    degraded_samples: rows.len() - values.len(),
                    mean_multiplier: mean,
                    min_multiplier: min,
                    max_multiplier: max,
                    worst_tier,
                }
            })
            .collect())
    }

    /// Write the roll-up for `date`, replacing any previous one
    pub fn write_daily_rollup(&self, date: NaiveDate) -> Result<usize> {
        let rollup = self.daily_rollup(date)?;
        let path = self
            .data_dir
            .join("rollups")
            .join(format!("multipliers_rollup_{}.csv", date.format("%Y-%m-%d")));
        let mut writer = WriterBuilder::new()
            .has_headers(true)
            .from_path(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        for row in &rollup {
            writer.serialize(row).context("Failed to write rollup record")?;
        }
        writer.flush().context("Failed to flush rollup writer")?;
        info!(date = %date, products = rollup.len(), "Wrote daily multiplier roll-up");
        Ok(rollup.len())
    }
}

#[async_trait]
impl HistoryStore for CsvPersistence {
    async fn append_snapshot(&self, snapshot: &MarketSnapshot) -> Result<bool> {
        let id = &snapshot.snapshot_id;
        if self
            .recorded_snapshots
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(id)
        {
            return Ok(false);
        }

        let date = snapshot.timestamp.date_naive();
        let ts = snapshot.timestamp.timestamp_millis();

        let prices: Vec<PriceRecord> = snapshot
            .prices
            .iter()
            .map(|p| PriceRecord {
                timestamp: ts,
                snapshot_id: id.clone(),
                asset: p.asset.symbol().to_string(),
                price: p.price,
                confidence: p.confidence,
                deviation: p.deviation,
                source_count: p.source_count,
                sources: p.sources.join("|"),
            })
            .collect();
        let bridges: Vec<BridgeRecord> = snapshot
            .bridges
            .iter()
            .map(|b| BridgeRecord {
                timestamp: ts,
                snapshot_id: id.clone(),
                bridge: b.bridge.clone(),
                chain: b.chain.key().to_string(),
                health_score: b.health_score,
                daily_volume_usd: b.daily_volume_usd,
            })
            .collect();
        let congestion: Vec<CongestionRecord> = snapshot
            .congestion
            .iter()
            .map(|c| CongestionRecord {
                timestamp: ts,
                snapshot_id: id.clone(),
                chain: c.chain.key().to_string(),
                congestion_score: c.congestion_score,
                gas_used_ratio: c.gas_used_ratio,
                base_fee_gwei: c.base_fee_gwei,
            })
            .collect();
        let quality = &snapshot.data_quality;
        let summary = SnapshotRecord {
            timestamp: ts,
            snapshot_id: id.clone(),
            prices: snapshot.prices.len(),
            bridges: snapshot.bridges.len(),
            congestion: snapshot.congestion.len(),
            liquidation_total_usd: snapshot.liquidations.total_usd,
            stress_level: snapshot.liquidations.stress_level.to_string(),
            degraded_domains: join(snapshot.degraded_domains.iter()),
            total_sources: quality.total_sources,
            successful_sources: quality.successful_sources,
            failed_sources: quality.failed_sources,
            anomalies_detected: quality.anomalies_detected,
            cache_hit_rate: quality.cache_hit_rate,
        };

        self.price_writer.append(date, &prices).await?;
        self.bridge_writer.append(date, &bridges).await?;
        self.congestion_writer.append(date, &congestion).await?;
        self.snapshot_writer.append(date, &[summary]).await?;

        self.recorded_snapshots
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id.clone());
        Ok(true)
    }

    async fn append_readings(&self, snapshot: &MarketSnapshot, readings: &[ReadingOutcome]) -> Result<usize> {
        let ts = snapshot.timestamp.timestamp_millis();
        let rows: Vec<ReadingRecord> = readings
            .iter()
            .map(|outcome| ReadingRecord {
                timestamp: ts,
                snapshot_id: snapshot.snapshot_id.clone(),
                source: outcome.reading.source.clone(),
                asset: outcome.reading.asset.symbol().to_string(),
                price: outcome.reading.price,
                confidence: outcome.reading.confidence,
                reading_timestamp: outcome.reading.timestamp.timestamp_millis(),
                accepted: outcome.accepted,
                reason: outcome.reason.clone(),
            })
            .collect();
        self.reading_writer
            .append(snapshot.timestamp.date_naive(), &rows)
            .await?;
        Ok(rows.len())
    }

    async fn append_risk_pass(&self, pass: &RiskPass) -> Result<usize> {
        if self
            .recorded_passes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(&pass.snapshot_id)
        {
            return Ok(0);
        }

        let rows: Vec<MultiplierRecord> = pass
            .products
            .iter()
            .map(|risk| MultiplierRecord::from_risk(risk, &pass.snapshot_id, pass.computed_at))
            .collect();
        self.multiplier_writer
            .append(pass.computed_at.date_naive(), &rows)
            .await?;

        self.recorded_passes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(pass.snapshot_id.clone());
        Ok(rows.len())
    }

    async fn close_day(&self, date: NaiveDate) -> Result<usize> {
        self.write_daily_rollup(date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::DataQuality;
    use crate::oracle::{BridgeHealth, ChainCongestion, ConsensusResult, LiquidationAggregate, PriceReading};
    use crate::risk::{ExploitTable, RiskConfig, RiskScoreCalculator};
    use crate::types::{Chain, CoverageType};
    use chrono::TimeZone;
    use std::sync::Arc;

    fn temp_data_dir(test_name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "riskoracle_persistence_{}_{}",
            test_name,
            uuid::Uuid::new_v4()
        ))
    }

    fn snapshot_at(ts: DateTime<Utc>, price: f64) -> MarketSnapshot {
        let mut snap = MarketSnapshot {
            snapshot_id: String::new(),
            timestamp: ts,
            prices: vec![ConsensusResult {
                asset: Stablecoin::USDC,
                price,
                confidence: 0.9,
                deviation: 0.0001,
                source_count: 2,
                sources: vec!["binance".into(), "pyth".into()],
                timestamp: ts,
            }],
            bridges: vec![BridgeHealth {
                bridge: "Stargate".into(),
                chain: Chain::Ethereum,
                health_score: 0.95,
                daily_volume_usd: 1.0e6,
                timestamp: ts,
            }],
            liquidations: LiquidationAggregate::empty(ts),
            congestion: vec![ChainCongestion {
                chain: Chain::Ethereum,
                congestion_score: 0.2,
                gas_used_ratio: 0.4,
                base_fee_gwei: 8.0,
                timestamp: ts,
            }],
            degraded_domains: vec![],
            price_alerts: vec![],
            domain_as_of: vec![],
            data_quality: DataQuality::default(),
        };
        snap.snapshot_id = snap.fingerprint();
        snap
    }

    #[tokio::test]
    async fn append_snapshot_writes_rows_and_dedupes_by_id() {
        let data_dir = temp_data_dir("dedupe");
        let persistence = CsvPersistence::new(data_dir.to_str().unwrap()).unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let snap = snapshot_at(ts, 1.0);

        assert!(persistence.append_snapshot(&snap).await.unwrap());
        assert!(!persistence.append_snapshot(&snap).await.unwrap());

        let range = (ts - Duration::hours(1), ts + Duration::hours(1));
        assert_eq!(persistence.load_snapshots(range.0, range.1).unwrap().len(), 1);
        let prices = persistence.load_prices(Stablecoin::USDC, range.0, range.1).unwrap();
        assert_eq!(prices.len(), 1);
        assert_eq!(prices[0].sources, "binance|pyth");
        assert!(data_dir.join("bridges").join("bridges_2024-05-01.csv").exists());
        assert!(data_dir.join("congestion").join("congestion_2024-05-01.csv").exists());

        let header = fs::read_to_string(data_dir.join("snapshots").join("snapshots_2024-05-01.csv"))
            .unwrap()
            .lines()
            .next()
            .unwrap_or_default()
            .to_string();
        assert!(header.starts_with("timestamp,snapshot_id,prices"), "unexpected header: {}", header);

        let _ = fs::remove_dir_all(&data_dir);
    }

    #[tokio::test]
    async fn rows_are_partitioned_by_cycle_day() {
        let data_dir = temp_data_dir("partition");
        let persistence = CsvPersistence::new(data_dir.to_str().unwrap()).unwrap();
        let day1 = Utc.with_ymd_and_hms(2024, 5, 1, 23, 59, 30).unwrap();
        let day2 = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 30).unwrap();

        persistence.append_snapshot(&snapshot_at(day1, 1.0)).await.unwrap();
        persistence.append_snapshot(&snapshot_at(day2, 0.999)).await.unwrap();

        assert!(data_dir.join("prices").join("prices_2024-05-01.csv").exists());
        assert!(data_dir.join("prices").join("prices_2024-05-02.csv").exists());

        let only_day2 = persistence
            .load_prices(Stablecoin::USDC, day2 - Duration::seconds(1), day2)
            .unwrap();
        assert_eq!(only_day2.len(), 1);
        let both = persistence
            .load_prices(Stablecoin::USDC, day1, day2)
            .unwrap();
        assert_eq!(both.len(), 2);
        assert!(both[0].timestamp < both[1].timestamp);

        let _ = fs::remove_dir_all(&data_dir);
    }

    fn reading(source: &str, asset: Stablecoin, price: f64, at: DateTime<Utc>) -> PriceReading {
        PriceReading {
            source: source.to_string(),
            asset,
            price,
            confidence: 0.95,
            timestamp: at - Duration::seconds(2),
        }
    }

    #[tokio::test]
    async fn raw_readings_load_by_range_and_asset() {
        let data_dir = temp_data_dir("readings");
        let persistence = CsvPersistence::new(data_dir.to_str().unwrap()).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 5, 1, 23, 59, 50).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 20).unwrap();

        let first = snapshot_at(t1, 1.0);
        let written = persistence
            .append_readings(
                &first,
                &[
                    ReadingOutcome::accepted(reading("binance", Stablecoin::USDC, 1.0, t1)),
                    ReadingOutcome::rejected(
                        reading("pyth", Stablecoin::USDC, 1.5, t1),
                        "pyth:USDC out of bounds".to_string(),
                    ),
                    ReadingOutcome::accepted(reading("binance", Stablecoin::USDT, 0.9998, t1)),
                ],
            )
            .await
            .unwrap();
        assert_eq!(written, 3);
        let second = snapshot_at(t2, 0.999);
        persistence
            .append_readings(
                &second,
                &[ReadingOutcome::accepted(reading("coinbase", Stablecoin::USDC, 0.999, t2))],
            )
            .await
            .unwrap();

        assert!(data_dir.join("readings").join("readings_2024-05-01.csv").exists());
        assert!(data_dir.join("readings").join("readings_2024-05-02.csv").exists());

        let usdc = persistence.load_readings(Some(Stablecoin::USDC), t1, t2).unwrap();
        assert_eq!(usdc.len(), 3);
        let pyth = usdc.iter().find(|r| r.source == "pyth").unwrap();
        assert!(!pyth.accepted);
        assert_eq!(pyth.reason.as_deref(), Some("pyth:USDC out of bounds"));
        assert_eq!(pyth.snapshot_id, first.snapshot_id);
        assert_eq!(pyth.timestamp, t1.timestamp_millis());
        assert_eq!(pyth.reading_timestamp, (t1 - Duration::seconds(2)).timestamp_millis());
        assert!(usdc.iter().filter(|r| r.source != "pyth").all(|r| r.accepted && r.reason.is_none()));

        // Cycle time decides the range, not the source's own timestamp
        let late = persistence.load_readings(None, t2, t2).unwrap();
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].source, "coinbase");
        assert_eq!(persistence.load_readings(None, t1, t2).unwrap().len(), 4);

        let _ = fs::remove_dir_all(&data_dir);
    }

    #[tokio::test]
    async fn risk_pass_rows_and_daily_rollup() {
        let data_dir = temp_data_dir("rollup");
        let persistence = CsvPersistence::new(data_dir.to_str().unwrap()).unwrap();
        let calculator = RiskScoreCalculator::new(RiskConfig::default(), ExploitTable::empty());

        let t1 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap();
        let pass1 = calculator.compute_all(Arc::new(snapshot_at(t1, 1.0))).await;
        let pass2 = calculator.compute_all(Arc::new(snapshot_at(t2, 0.97))).await;

        assert_eq!(persistence.append_risk_pass(&pass1).await.unwrap(), 245);
        assert_eq!(persistence.append_risk_pass(&pass1).await.unwrap(), 0);
        assert_eq!(persistence.append_risk_pass(&pass2).await.unwrap(), 245);

        let product = ProductKey::new(CoverageType::Depeg, Chain::Ethereum, Stablecoin::USDC);
        let rows = persistence
            .load_multipliers(Some(&product), t1, t2)
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.status == "priced"));
        assert!(rows.iter().all(|r| r.missing_inputs.is_empty()));

        let uncovered = ProductKey::new(CoverageType::Bridge, Chain::Arbitrum, Stablecoin::USDC);
        let rows = persistence.load_multipliers(Some(&uncovered), t1, t1).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, "degraded");
        assert_eq!(rows[0].final_multiplier, None);
        assert_eq!(rows[0].missing_inputs, "bridge_health|congestion");

        let date = t1.date_naive();
        let rollup = persistence.daily_rollup(date).unwrap();
        assert_eq!(rollup.len(), 245);
        let depeg = rollup
            .iter()
            .find(|r| r.coverage_type == "depeg" && r.chain == "ethereum" && r.stablecoin == "USDC")
            .unwrap();
        assert_eq!(depeg.samples, 2);
        // 0.97 moves the depeg factor from 1.0 to 1.3
        let min = depeg.min_multiplier.unwrap();
        let max = depeg.max_multiplier.unwrap();
        assert!((max / min - 1.3).abs() < 1e-9);

        let dai = rollup
            .iter()
            .find(|r| r.stablecoin == "DAI" && r.coverage_type == "depeg" && r.chain == "ethereum")
            .unwrap();
        assert_eq!(dai.degraded_samples, 2);
        assert_eq!(dai.mean_multiplier, None);

        assert_eq!(persistence.write_daily_rollup(date).unwrap(), 245);
        assert!(data_dir.join("rollups").join("multipliers_rollup_2024-05-01.csv").exists());

        let _ = fs::remove_dir_all(&data_dir);
    }

    #[test]
    fn multiplier_record_reads_back_empty_optionals() {
        let raw = "timestamp,snapshot_id,coverage_type,chain,stablecoin,status,base_rate,price_depeg_factor,bridge_health_factor,chain_congestion_factor,exploit_frequency_factor,liquidation_stress_factor,final_multiplier,risk_tier,missing_inputs,reason\n1,abc,depeg,ethereum,DAI,degraded,,,,,,,,,,no consensus price for DAI\n";
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(raw.as_bytes());
        let row: MultiplierRecord = reader.deserialize().next().unwrap().unwrap();
        assert_eq!(row.final_multiplier, None);
        assert_eq!(row.risk_tier, None);
        assert_eq!(row.reason.as_deref(), Some("no consensus price for DAI"));
    }
}
