//! Progress arithmetic and per-transfer counters shared between one writer and any number of readers.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// `floor(done * 100 / total)` clamped to 0..=100. An empty transfer is complete by definition.
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let p = (done as u128 * 100) / total as u128;
    p.min(100) as u8
}

/// Point-in-time view of a transfer's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub bytes_done: u64,
    pub total_bytes: u64,
    pub percent: u8,
}

/// Byte counters for one transfer. Written only by the task that owns the transfer.
#[derive(Debug, Default)]
pub struct TransferCounters {
    bytes_done: AtomicU64,
    total_bytes: AtomicU64,
}

impl TransferCounters {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            bytes_done: AtomicU64::new(0),
            total_bytes: AtomicU64::new(total_bytes),
        }
    }

    pub fn set_total(&self, total_bytes: u64) {
        self.total_bytes.store(total_bytes, Ordering::Release);
    }

    /// Add `n` bytes, never past the total. Returns the new count.
    pub fn advance(&self, n: u64) -> u64 {
        let total = self.total_bytes.load(Ordering::Acquire);
        let done = self
            .bytes_done
            .load(Ordering::Acquire)
            .saturating_add(n)
            .min(total);
        self.bytes_done.store(done, Ordering::Release);
        done
    }

    pub fn bytes_done(&self) -> u64 {
        self.bytes_done.load(Ordering::Acquire)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let total_bytes = self.total_bytes();
        let bytes_done = self.bytes_done();
        ProgressSnapshot {
            bytes_done,
            total_bytes,
            percent: percent(bytes_done, total_bytes),
        }
    }
}
