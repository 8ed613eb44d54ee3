//! Reconstruction orders from the cluster controller

use stripefs_common::{EcPolicy, Error, ExtendedBlock, PeerInfo, Result, StorageClass};
use stripefs_erasure::min_required_sources;

/// One reconstruction order: rebuild the missing internal blocks of
/// `block_group` from the listed live sources and ship them to the
/// listed targets.
///
/// `live_indices[i]` is the internal block index held by `sources[i]`;
/// `target_storage_classes[j]` is where `targets[j]` should place its
/// rebuilt block. Which internal index each target receives is derived
/// from the gap between `0..D+P` and `live_indices`, in index order.
#[derive(Clone, Debug)]
pub struct ReconstructionCommand {
    pub block_group: ExtendedBlock,
    pub policy: EcPolicy,
    pub live_indices: Vec<u8>,
    pub sources: Vec<PeerInfo>,
    pub targets: Vec<PeerInfo>,
    pub target_storage_classes: Vec<StorageClass>,
}

impl ReconstructionCommand {
    /// Check the order's structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.live_indices.len() != self.sources.len() {
            return Err(Error::invalid_command(
                "live block indices and source peers must match",
            ));
        }
        if self.targets.len() != self.target_storage_classes.len() {
            return Err(Error::invalid_command(
                "target peers and storage classes must match",
            ));
        }
        let total = self.policy.total_units();
        let mut seen = vec![false; total];
        for &idx in &self.live_indices {
            let idx = idx as usize;
            if idx >= total {
                return Err(Error::invalid_command(format!(
                    "live index {idx} out of range for {}",
                    self.policy
                )));
            }
            if seen[idx] {
                return Err(Error::invalid_command(format!(
                    "duplicate live index {idx}"
                )));
            }
            seen[idx] = true;
        }
        let needed = min_required_sources(
            self.block_group.num_bytes,
            self.policy.cell_size,
            self.policy.data_units,
        );
        if self.live_indices.len() < needed {
            return Err(Error::invalid_command(format!(
                "not enough live striped blocks: have {}, need {needed}",
                self.live_indices.len()
            )));
        }
        if self.targets.len() > self.policy.parity_units {
            return Err(Error::invalid_command(format!(
                "too many missed striped blocks: {} targets for {}",
                self.targets.len(),
                self.policy
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use uuid::Uuid;

    fn peer(port: u16) -> PeerInfo {
        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        PeerInfo::new(Uuid::new_v4(), addr)
    }

    fn sample() -> ReconstructionCommand {
        ReconstructionCommand {
            block_group: ExtendedBlock::new("BP-1", 0x100, 1, 6 * 1024 * 1024),
            policy: EcPolicy::new(3, 2, 64 * 1024),
            live_indices: vec![0, 1, 3, 4],
            sources: (0..4).map(|i| peer(9000 + i)).collect(),
            targets: vec![peer(9100)],
            target_storage_classes: vec![StorageClass::Disk],
        }
    }

    #[test]
    fn test_valid_command() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_mismatched_sources() {
        let mut cmd = sample();
        cmd.sources.pop();
        assert!(cmd.validate().is_err());
    }

    #[test]
    fn test_duplicate_live_index() {
        let mut cmd = sample();
        cmd.live_indices = vec![0, 1, 1, 4];
        assert!(cmd.validate().is_err());
    }

    #[test]
    fn test_live_index_out_of_range() {
        let mut cmd = sample();
        cmd.live_indices = vec![0, 1, 3, 7];
        assert!(cmd.validate().is_err());
    }

    #[test]
    fn test_not_enough_sources() {
        let mut cmd = sample();
        cmd.live_indices.truncate(2);
        cmd.sources.truncate(2);
        assert!(cmd.validate().is_err());
    }

    #[test]
    fn test_too_many_targets() {
        let mut cmd = sample();
        cmd.targets = vec![peer(9100), peer(9101), peer(9102)];
        cmd.target_storage_classes = vec![StorageClass::Disk; 3];
        assert!(cmd.validate().is_err());
    }
}
