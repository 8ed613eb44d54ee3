//! Node-level collaborators the engine borrows from its host
//!
//! The reconstruction engine runs inside a storage node but does not own
//! node-wide concerns: block access tokens come from the node's token
//! machinery, and corrupt replicas are reported back to the cluster
//! controller. Both are trait seams here so the engine (and its tests)
//! can run against any host.

use std::sync::Arc;
use stripefs_common::{AccessMode, BlockToken, ExtendedBlock, PeerInfo, ReconstructionConfig};
use tracing::warn;

use crate::metrics::ReconMetrics;

/// Issues block access tokens for outgoing peer connections.
pub trait BlockTokenProvider: Send + Sync {
    /// Token authorizing `mode` on `block`
    fn block_token(&self, block: &ExtendedBlock, mode: AccessMode) -> BlockToken;
}

/// Token provider for clusters without block token authentication:
/// every token is empty.
#[derive(Debug, Default)]
pub struct InsecureTokenProvider;

impl BlockTokenProvider for InsecureTokenProvider {
    fn block_token(&self, _block: &ExtendedBlock, _mode: AccessMode) -> BlockToken {
        BlockToken::default()
    }
}

/// One corrupt replica observed during reconstruction
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorruptEntry {
    pub block: ExtendedBlock,
    pub source: PeerInfo,
}

/// The corrupt replicas observed in one read iteration, delivered to the
/// controller so it can invalidate them.
#[derive(Clone, Debug, Default)]
pub struct CorruptionReport {
    pub entries: Vec<CorruptEntry>,
}

impl CorruptionReport {
    /// Record one corrupt replica
    pub fn add(&mut self, block: ExtendedBlock, source: PeerInfo) {
        self.entries.push(CorruptEntry { block, source });
    }

    /// True when nothing was observed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Receives per-iteration corruption reports (normally the controller
/// heartbeat channel).
pub trait CorruptionReporter: Send + Sync {
    fn report(&self, report: CorruptionReport);
}

/// Reporter that only logs; the default when no controller channel is
/// wired up.
#[derive(Debug, Default)]
pub struct LogCorruptionReporter;

impl CorruptionReporter for LogCorruptionReporter {
    fn report(&self, report: CorruptionReport) {
        for entry in &report.entries {
            warn!(
                "corrupt replica of {} on {} (no controller channel configured)",
                entry.block, entry.source
            );
        }
    }
}

/// Everything a reconstruction task needs from the hosting node.
#[derive(Clone)]
pub struct ReconContext {
    /// Engine configuration
    pub config: ReconstructionConfig,
    /// This node, named as the source in write-block requests
    pub local: PeerInfo,
    /// Block token issuance
    pub tokens: Arc<dyn BlockTokenProvider>,
    /// Corruption reporting channel to the controller
    pub corruption: Arc<dyn CorruptionReporter>,
    /// Engine metrics
    pub metrics: Arc<ReconMetrics>,
}

impl ReconContext {
    /// Context with default config, insecure tokens, and log-only
    /// corruption reporting.
    #[must_use]
    pub fn new(local: PeerInfo) -> Self {
        Self {
            config: ReconstructionConfig::default(),
            local,
            tokens: Arc::new(InsecureTokenProvider),
            corruption: Arc::new(LogCorruptionReporter),
            metrics: Arc::new(ReconMetrics::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insecure_tokens_are_empty() {
        let block = ExtendedBlock::new("BP-1", 1, 1, 0);
        let token = InsecureTokenProvider.block_token(&block, AccessMode::Read);
        assert!(token.is_empty());
    }

    #[test]
    fn test_report_accumulation() {
        let mut report = CorruptionReport::default();
        assert!(report.is_empty());
        let peer = PeerInfo::new(uuid::Uuid::new_v4(), "127.0.0.1:1".parse().unwrap());
        report.add(ExtendedBlock::new("BP-1", 2, 1, 0), peer);
        assert_eq!(report.entries.len(), 1);
    }
}
