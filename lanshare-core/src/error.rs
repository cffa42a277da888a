//! Why a transfer ended in failure. Carried inside terminal events, so it is `Clone` and serializable.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransferError {
    #[error("cannot open {path}: {reason}")]
    FileOpen { path: String, reason: String },
    #[error("cannot connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },
    #[error("connecting to {addr} timed out after {timeout_ms} ms")]
    ConnectTimeout { addr: String, timeout_ms: u64 },
    #[error("cannot create {path}: {reason}")]
    FileCreate { path: String, reason: String },
    #[error("malformed header: {reason}")]
    MalformedHeader { reason: String },
    #[error("transfer i/o failed: {reason}")]
    Io { reason: String },
    #[error("short transfer: {transferred} of {expected} bytes")]
    ShortTransfer { transferred: u64, expected: u64 },
    #[error("replaced by a newer incoming connection")]
    Superseded,
}

impl TransferError {
    pub fn io(err: &std::io::Error) -> Self {
        TransferError::Io {
            reason: err.to_string(),
        }
    }
}

impl From<crate::wire::MalformedHeader> for TransferError {
    fn from(m: crate::wire::MalformedHeader) -> Self {
        TransferError::MalformedHeader {
            reason: m.to_string(),
        }
    }
}
