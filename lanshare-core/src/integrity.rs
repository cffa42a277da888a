//! Content digest: SHA-256 over the body bytes a transfer actually moved.
//! Reported alongside the outcome; the wire protocol carries no checksum.

use sha2::{Digest, Sha256};

/// Incremental SHA-256 over streamed body bytes.
#[derive(Debug, Clone, Default)]
pub struct ContentDigest {
    hasher: Sha256,
}

impl ContentDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Finish and return the lowercase hex digest.
    pub fn finish_hex(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Hash a whole buffer. Returns the lowercase hex digest.
pub fn digest_hex(bytes: &[u8]) -> String {
    let mut d = ContentDigest::new();
    d.update(bytes);
    d.finish_hex()
}
