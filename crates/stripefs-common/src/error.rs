//! Error types for StripeFS
//!
//! This module defines the common error type used by the storage-node
//! components. Variants are grouped by how the reconstruction engine
//! reacts to them: per-read errors are recovered by rescheduling, the
//! rest are fatal to the task that hits them.

use thiserror::Error;

/// Common result type for StripeFS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for StripeFS
#[derive(Debug, Error)]
pub enum Error {
    // Transport errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection to {peer} timed out")]
    ConnectTimeout { peer: String },

    #[error("operation timed out")]
    Timeout,

    // Data integrity errors
    #[error("checksum mismatch reading {block} from {source_addr}")]
    ChecksumMismatch { block: String, source_addr: String },

    // Reconstruction errors
    #[error("can't find minimum sources required by reconstruction, block id: {block_id} (have {have}, need {need})")]
    InsufficientSources {
        have: usize,
        need: usize,
        block_id: u64,
    },

    #[error("transfer failed for all targets, block id: {block_id}")]
    AllTargetsFailed { block_id: u64 },

    #[error("erasure decode failed: {0}")]
    Erasure(String),

    // Wire protocol errors
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("access denied by peer")]
    AccessDenied,

    // Command errors
    #[error("invalid reconstruction command: {0}")]
    InvalidCommand(String),
}

impl Error {
    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create an invalid command error
    pub fn invalid_command(msg: impl Into<String>) -> Self {
        Self::InvalidCommand(msg.into())
    }

    /// Check whether this error came from a corrupt replica
    #[must_use]
    pub fn is_checksum_error(&self) -> bool {
        matches!(self, Self::ChecksumMismatch { .. })
    }
}
