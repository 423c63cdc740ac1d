//! Published risk multipliers: point queries and a push channel

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

use crate::risk::{BusinessCircuit, FleetSummary, ProductRisk, RiskPass};
use crate::types::ProductKey;

/// Message pushed to subscribers after every published pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RiskUpdate {
    Pass {
        snapshot_id: String,
        computed_at: DateTime<Utc>,
        summary: FleetSummary,
        circuit: BusinessCircuit,
    },
}

/// Immutable view of one published pass
#[derive(Debug)]
struct TableView {
    pass: Arc<RiskPass>,
    index: HashMap<ProductKey, usize>,
}

impl TableView {
    fn new(pass: Arc<RiskPass>) -> Self {
        let index = pass
            .products
            .iter()
            .enumerate()
            .map(|(i, p)| (p.product(), i))
            .collect();
        Self { pass, index }
    }
}

/// Latest risk pass, written by the monitor loop only.
///
/// Cloning shares the same table. Readers clone an `Arc` under a short read
/// lock and never see a partially published pass.
#[derive(Debug, Clone)]
pub struct RiskTable {
    current: Arc<RwLock<Option<Arc<TableView>>>>,
    tx: broadcast::Sender<RiskUpdate>,
}

impl RiskTable {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            current: Arc::new(RwLock::new(None)),
            tx,
        }
    }

    fn view(&self) -> Option<Arc<TableView>> {
        self.current
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Replace the table atomically and notify subscribers
    pub fn publish(&self, pass: Arc<RiskPass>) {
        let update = RiskUpdate::Pass {
            snapshot_id: pass.snapshot_id.clone(),
            computed_at: pass.computed_at,
            summary: pass.summary.clone(),
            circuit: pass.circuit.clone(),
        };
        let view = Arc::new(TableView::new(pass));
        *self.current.write().unwrap_or_else(|p| p.into_inner()) = Some(view);
        // No receivers is fine
        let _ = self.tx.send(update);
    }

    pub fn get(&self, product: &ProductKey) -> Option<ProductRisk> {
        let view = self.view()?;
        let index = *view.index.get(product)?;
        view.pass.products.get(index).cloned()
    }

    pub fn current(&self) -> Option<Arc<RiskPass>> {
        self.view().map(|v| Arc::clone(&v.pass))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RiskUpdate> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for RiskTable {
    fn default() -> Self {
        Self::new(64)
    }
}
