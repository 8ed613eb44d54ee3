//! Configuration for the striped-block reconstruction engine
//!
//! Keys mirror the node configuration file entries under
//! `reconstruction.striped-read.*` and `reconstruction.striped-blk.*`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconstruction engine configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconstructionConfig {
    /// Timeout for a single slice read to complete
    /// (`reconstruction.striped-read.timeout-ms`)
    pub striped_read_timeout_ms: u64,
    /// Maximum concurrent slice reads across all tasks
    /// (`reconstruction.striped-read.threads`)
    pub striped_read_threads: usize,
    /// Raw read buffer size; rounded down at runtime to a multiple of the
    /// checksum chunk size, never below it
    /// (`reconstruction.striped-read.buffer-size`)
    pub striped_read_buffer_size: usize,
    /// Maximum concurrent reconstruction tasks
    /// (`reconstruction.striped-blk.threads`)
    pub striped_blk_threads: usize,
    /// Node-global socket connect/read/write timeout
    pub socket_timeout_ms: u64,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            striped_read_timeout_ms: 5_000,
            striped_read_threads: 20,
            striped_read_buffer_size: 64 * 1024, // 64 KiB
            striped_blk_threads: 8,
            socket_timeout_ms: 60_000,
        }
    }
}

impl ReconstructionConfig {
    /// Slice-read completion timeout
    #[must_use]
    pub fn striped_read_timeout(&self) -> Duration {
        Duration::from_millis(self.striped_read_timeout_ms)
    }

    /// Node-global socket timeout
    #[must_use]
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    /// Round the raw read buffer size down to a multiple of
    /// `bytes_per_checksum`, never below one chunk.
    #[must_use]
    pub fn aligned_buffer_size(&self, bytes_per_checksum: usize) -> usize {
        let raw = self.striped_read_buffer_size;
        if raw < bytes_per_checksum {
            bytes_per_checksum
        } else {
            raw - raw % bytes_per_checksum
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ReconstructionConfig::default();
        assert_eq!(config.striped_read_timeout_ms, 5_000);
        assert_eq!(config.striped_read_threads, 20);
        assert_eq!(config.striped_read_buffer_size, 64 * 1024);
        assert_eq!(config.striped_blk_threads, 8);
    }

    #[test]
    fn test_aligned_buffer_size() {
        let config = ReconstructionConfig {
            striped_read_buffer_size: 64 * 1024,
            ..Default::default()
        };
        // Exact multiple stays put
        assert_eq!(config.aligned_buffer_size(512), 64 * 1024);
        // Non-multiple rounds down
        assert_eq!(config.aligned_buffer_size(1000), 65_000);
        // Never below one chunk
        let small = ReconstructionConfig {
            striped_read_buffer_size: 100,
            ..Default::default()
        };
        assert_eq!(small.aligned_buffer_size(512), 512);
    }
}
