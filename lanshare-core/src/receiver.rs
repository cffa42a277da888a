//! Inbound transfer state machine. Host-driven: the host feeds whatever bytes the
//! connection produced, writes the body slices it is handed, and reports back what it wrote.
//!
//! Per connection:
//! 1. `feed` until it returns [`Feed::Header`]; create the output file; write the attached body bytes.
//! 2. `record_written` after every write; it returns progress and whether the transfer is complete.
//! 3. Keep feeding; [`Feed::Body`] slices go straight to the file.
//! 4. On disconnect call `on_disconnect`, which turns an unfinished transfer into a failure.

use std::path::{Path, PathBuf};

use crate::error::TransferError;
use crate::integrity::ContentDigest;
use crate::progress::percent;
use crate::wire::{decode_header, HeaderDecodeError, TransferHeader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingHeader,
    Body,
    Complete,
    Failed,
}

/// What the host should do with the bytes it just fed.
#[derive(Debug, PartialEq, Eq)]
pub enum Feed<'a> {
    /// Header incomplete; nothing to do yet.
    NeedMore,
    /// Header decoded. Create the output file, then write `body` (may be empty).
    Header { header: TransferHeader, body: Vec<u8> },
    /// Write these bytes to the open output file.
    Body(&'a [u8]),
    /// Bytes past the declared payload size, dropped.
    Discarded(usize),
}

/// Result of recording a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub bytes_received: u64,
    pub percent: u8,
    pub complete: bool,
}

#[derive(Debug)]
pub struct InboundTransfer {
    phase: Phase,
    buffer: Vec<u8>,
    header: Option<TransferHeader>,
    bytes_received: u64,
    discarded: u64,
    digest: ContentDigest,
}

impl Default for InboundTransfer {
    fn default() -> Self {
        Self::new()
    }
}

impl InboundTransfer {
    pub fn new() -> Self {
        Self {
            phase: Phase::AwaitingHeader,
            buffer: Vec::new(),
            header: None,
            bytes_received: 0,
            discarded: 0,
            digest: ContentDigest::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn header(&self) -> Option<&TransferHeader> {
        self.header.as_ref()
    }

    pub fn expected_bytes(&self) -> u64 {
        self.header.as_ref().map(|h| h.payload_size).unwrap_or(0)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Bytes dropped because they arrived past the declared payload size.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }

    /// Feed newly available bytes. A malformed header fails the transfer; the host must abort the connection.
    pub fn feed<'a>(&mut self, bytes: &'a [u8]) -> Result<Feed<'a>, TransferError> {
        match self.phase {
            Phase::AwaitingHeader => {
                self.buffer.extend_from_slice(bytes);
                match decode_header(&self.buffer) {
                    Err(HeaderDecodeError::NeedMore) => Ok(Feed::NeedMore),
                    Err(HeaderDecodeError::Malformed(m)) => {
                        self.phase = Phase::Failed;
                        self.buffer.clear();
                        Err(m.into())
                    }
                    Ok((header, consumed)) => {
                        let rest = &self.buffer[consumed..];
                        let take = clamp_len(rest.len(), header.payload_size);
                        self.discarded += (rest.len() - take) as u64;
                        let body = rest[..take].to_vec();
                        self.buffer = Vec::new();
                        self.header = Some(header.clone());
                        self.phase = Phase::Body;
                        Ok(Feed::Header { header, body })
                    }
                }
            }
            Phase::Body => {
                let remaining = self.expected_bytes() - self.bytes_received;
                let take = clamp_len(bytes.len(), remaining);
                self.discarded += (bytes.len() - take) as u64;
                Ok(Feed::Body(&bytes[..take]))
            }
            Phase::Complete | Phase::Failed => {
                self.discarded += bytes.len() as u64;
                Ok(Feed::Discarded(bytes.len()))
            }
        }
    }

    /// Record body bytes the host has written to the output file.
    pub fn record_written(&mut self, written: &[u8]) -> Progress {
        if self.phase == Phase::Body {
            let remaining = self.expected_bytes() - self.bytes_received;
            let take = clamp_len(written.len(), remaining);
            self.digest.update(&written[..take]);
            self.bytes_received += take as u64;
            if self.bytes_received == self.expected_bytes() {
                self.phase = Phase::Complete;
            }
        }
        Progress {
            bytes_received: self.bytes_received,
            percent: percent(self.bytes_received, self.expected_bytes()),
            complete: self.phase == Phase::Complete,
        }
    }

    /// Mark the transfer failed (e.g. output file could not be created or written).
    pub fn abort(&mut self) {
        if self.phase != Phase::Complete {
            self.phase = Phase::Failed;
        }
        self.buffer.clear();
    }

    /// Connection closed. Returns the failure to report, or `None` if the transfer already ended.
    pub fn on_disconnect(&mut self) -> Option<TransferError> {
        match self.phase {
            Phase::Complete | Phase::Failed => None,
            Phase::AwaitingHeader => {
                self.phase = Phase::Failed;
                self.buffer.clear();
                Some(TransferError::Io {
                    reason: "connection closed before the header was complete".to_string(),
                })
            }
            Phase::Body => {
                self.phase = Phase::Failed;
                Some(TransferError::ShortTransfer {
                    transferred: self.bytes_received,
                    expected: self.expected_bytes(),
                })
            }
        }
    }

    /// Hex SHA-256 of the body bytes recorded so far.
    pub fn digest_hex(&self) -> String {
        self.digest.clone().finish_hex()
    }
}

fn clamp_len(len: usize, limit: u64) -> usize {
    if (len as u64) > limit {
        limit as usize
    } else {
        len
    }
}

/// Where to save an incoming file: `dir` joined with the last path component of `file_name`.
/// Returns `None` if nothing usable is left.
pub fn resolve_destination(dir: &Path, file_name: &str) -> Option<PathBuf> {
    let base = file_name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or("")
        .trim();
    if base.is_empty() || base == "." || base == ".." || base.contains('\0') {
        return None;
    }
    Some(dir.join(base))
}
