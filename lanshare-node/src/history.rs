//! Files moved successfully in either direction, oldest first.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use lanshare_core::{Direction, TransferId};
use serde::Serialize;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub id: TransferId,
    pub direction: Direction,
    pub peer: SocketAddr,
    pub file_name: String,
    pub bytes: u64,
    /// Local file: source for outbound, destination for inbound.
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct TransferHistory {
    entries: Arc<Mutex<Vec<HistoryEntry>>>,
}

impl TransferHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, entry: HistoryEntry) {
        self.entries.lock().await.push(entry);
    }

    pub async fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.lock().await.clone()
    }
}
