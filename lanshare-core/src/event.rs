//! Transfer events delivered to the controller, in emission order, one terminal event per transfer.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Serialize;
use uuid::Uuid;

use crate::error::TransferError;

/// Identifies one outbound or inbound transfer for its whole lifetime.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize)]
#[serde(transparent)]
pub struct TransferId(Uuid);

impl TransferId {
    pub fn new() -> Self {
        TransferId(Uuid::new_v4())
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to tell transfers apart in logs.
        write!(f, "{}", &self.0.simple().to_string()[..8])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outbound,
    Inbound,
}

/// Terminal status of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferOutcome {
    pub success: bool,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    /// Where an inbound file was written (also set on failure if a partial file exists).
    pub saved_path: Option<PathBuf>,
    /// SHA-256 of the body bytes moved, hex. Only set on success.
    pub sha256: Option<String>,
    pub error: Option<TransferError>,
}

impl TransferOutcome {
    pub fn succeeded(bytes: u64, saved_path: Option<PathBuf>, sha256: String) -> Self {
        Self {
            success: true,
            bytes_transferred: bytes,
            total_bytes: bytes,
            saved_path,
            sha256: Some(sha256),
            error: None,
        }
    }

    pub fn failed(error: TransferError, bytes_transferred: u64, total_bytes: u64) -> Self {
        Self {
            success: false,
            bytes_transferred,
            total_bytes,
            saved_path: None,
            sha256: None,
            error: Some(error),
        }
    }

    pub fn with_saved_path(mut self, path: Option<PathBuf>) -> Self {
        self.saved_path = path;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransferEvent {
    /// Outbound: connection established. Inbound: header decoded.
    Started {
        id: TransferId,
        direction: Direction,
        peer: SocketAddr,
        file_name: String,
        total_bytes: u64,
    },
    Progress {
        id: TransferId,
        direction: Direction,
        percent: u8,
        bytes_done: u64,
    },
    Finished {
        id: TransferId,
        direction: Direction,
        outcome: TransferOutcome,
    },
}

impl TransferEvent {
    pub fn id(&self) -> TransferId {
        match self {
            TransferEvent::Started { id, .. }
            | TransferEvent::Progress { id, .. }
            | TransferEvent::Finished { id, .. } => *id,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            TransferEvent::Started { direction, .. }
            | TransferEvent::Progress { direction, .. }
            | TransferEvent::Finished { direction, .. } => *direction,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferEvent::Finished { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_ids_are_unique() {
        assert_ne!(TransferId::new(), TransferId::new());
    }

    #[test]
    fn display_is_short() {
        assert_eq!(TransferId::new().to_string().len(), 8);
    }

    #[test]
    fn failed_outcome_has_no_digest() {
        let o = TransferOutcome::failed(TransferError::Superseded, 3, 10);
        assert!(!o.success);
        assert!(o.sha256.is_none());
        assert_eq!(o.bytes_transferred, 3);
    }
}
