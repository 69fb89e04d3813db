//! Checksum utilities for binary block integrity

use sha2::{Digest, Sha256};
use std::fmt;

/// Width of the checksum field in a block header
pub const CHECKSUM_LEN: usize = 16;

/// Truncated SHA256 checksum of a block's used bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockChecksum([u8; CHECKSUM_LEN]);

impl BlockChecksum {
    /// Compute checksum from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        let mut out = [0u8; CHECKSUM_LEN];
        out.copy_from_slice(&hash[..CHECKSUM_LEN]);
        Self(out)
    }

    /// Wrap a checksum read back from a block header
    pub fn from_header(raw: [u8; CHECKSUM_LEN]) -> Self {
        Self(raw)
    }

    /// An all-zero checksum means the writer did not record one
    pub fn is_unset(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn as_bytes(&self) -> &[u8; CHECKSUM_LEN] {
        &self.0
    }

    /// Verify that data matches this checksum
    pub fn verify(&self, data: &[u8]) -> bool {
        self.is_unset() || *self == Self::from_bytes(data)
    }
}

impl fmt::Display for BlockChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}
