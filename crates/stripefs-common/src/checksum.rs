//! Chunked checksum framing for block data transfer
//!
//! Block bytes travel the wire in packets carrying one checksum word per
//! `bytes_per_checksum` chunk of payload. Both sides of a transfer must
//! agree on the descriptor; a reconstruction task lifts it from the first
//! source peer it reads from and reuses it for everything it writes.

use serde::{Deserialize, Serialize};

/// Checksum algorithm identity
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChecksumKind {
    /// CRC32C (Castagnoli), 4 bytes per chunk
    #[default]
    Crc32c,
    /// No checksums; zero bytes per chunk
    Null,
}

impl ChecksumKind {
    /// Wire code
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            Self::Crc32c => 2,
            Self::Null => 0,
        }
    }

    /// Decode from a wire code
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            2 => Some(Self::Crc32c),
            0 => Some(Self::Null),
            _ => None,
        }
    }
}

/// Chunked checksum configuration for one data stream
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumDescriptor {
    /// Algorithm identity
    pub kind: ChecksumKind,
    /// Payload bytes covered by each checksum word
    pub bytes_per_checksum: u32,
}

impl Default for ChecksumDescriptor {
    fn default() -> Self {
        Self {
            kind: ChecksumKind::Crc32c,
            bytes_per_checksum: 512,
        }
    }
}

impl ChecksumDescriptor {
    /// Create a descriptor
    #[must_use]
    pub const fn new(kind: ChecksumKind, bytes_per_checksum: u32) -> Self {
        Self {
            kind,
            bytes_per_checksum,
        }
    }

    /// Size of one checksum word in bytes
    #[must_use]
    pub const fn checksum_size(&self) -> usize {
        match self.kind {
            ChecksumKind::Crc32c => 4,
            ChecksumKind::Null => 0,
        }
    }

    /// Number of chunks covering `data_len` payload bytes
    #[must_use]
    pub const fn chunk_count(&self, data_len: usize) -> usize {
        data_len.div_ceil(self.bytes_per_checksum as usize)
    }

    /// Checksum bytes needed for `data_len` payload bytes
    #[must_use]
    pub const fn checksum_buf_len(&self, data_len: usize) -> usize {
        self.chunk_count(data_len) * self.checksum_size()
    }

    /// Compute chunked checksums over `data` into `out` (cleared first).
    ///
    /// One big-endian CRC32C word per chunk; the tail chunk may be short.
    pub fn calculate_chunked(&self, data: &[u8], out: &mut Vec<u8>) {
        out.clear();
        if matches!(self.kind, ChecksumKind::Null) {
            return;
        }
        for chunk in data.chunks(self.bytes_per_checksum as usize) {
            out.extend_from_slice(&crc32c::crc32c(chunk).to_be_bytes());
        }
    }

    /// Verify chunked checksums over `data` against `sums`.
    ///
    /// Returns false on any mismatch or if `sums` is the wrong length.
    #[must_use]
    pub fn verify_chunked(&self, data: &[u8], sums: &[u8]) -> bool {
        if matches!(self.kind, ChecksumKind::Null) {
            return sums.is_empty();
        }
        if sums.len() != self.checksum_buf_len(data.len()) {
            return false;
        }
        for (i, chunk) in data.chunks(self.bytes_per_checksum as usize).enumerate() {
            let off = i * 4;
            let expected = u32::from_be_bytes([sums[off], sums[off + 1], sums[off + 2], sums[off + 3]]);
            if crc32c::crc32c(chunk) != expected {
                return false;
            }
        }
        true
    }
}
