//! WebSocket Broadcaster
//!
//! Fans risk table updates out to all connected WebSocket clients.

use super::types::WsMessage;
use crate::monitor::RiskTable;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Channel for broadcasting updates to WebSocket clients
#[derive(Debug, Clone)]
pub struct WebSocketBroadcaster {
    tx: broadcast::Sender<String>,
}

impl WebSocketBroadcaster {
    /// Create a new broadcaster with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to receive broadcast messages
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Broadcast a message to all connected clients
    pub fn broadcast(&self, msg: &WsMessage) {
        if let Ok(json) = serde_json::to_string(msg) {
            // Ignore send errors (no receivers is fine)
            let _ = self.tx.send(json);
        }
    }

    /// Broadcast heartbeat
    pub fn broadcast_heartbeat(&self) {
        self.broadcast(&WsMessage::Heartbeat(chrono::Utc::now().timestamp_millis()));
    }

    /// Relay every update published on `table` until the table is dropped
    pub fn forward_from(&self, table: &RiskTable) -> JoinHandle<()> {
        let mut rx = table.subscribe();
        let broadcaster = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(update) => broadcaster.broadcast(&WsMessage::RiskUpdate(update)),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "WebSocket relay lagged behind risk table");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for WebSocketBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}
