//! Core type definitions for StripeFS
//!
//! Identifiers and descriptors shared between the storage node, its
//! peers, and the cluster controller.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use uuid::Uuid;

/// A block (or block group) identity plus its byte length.
///
/// For erasure-coded groups, `block_id` identifies the whole group; the
/// ids of the internal blocks are derived from it (the low bits of a
/// group id are reserved for the internal index).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExtendedBlock {
    /// Block pool this block belongs to
    pub pool_id: String,
    /// Numeric block id
    pub block_id: u64,
    /// Generation stamp; both ends must agree on it
    pub generation_stamp: u64,
    /// Total byte length
    pub num_bytes: u64,
}

impl ExtendedBlock {
    /// Create a new block identity
    #[must_use]
    pub fn new(pool_id: impl Into<String>, block_id: u64, generation_stamp: u64, num_bytes: u64) -> Self {
        Self {
            pool_id: pool_id.into(),
            block_id,
            generation_stamp,
            num_bytes,
        }
    }
}

impl fmt::Display for ExtendedBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:blk_{}_{}",
            self.pool_id, self.block_id, self.generation_stamp
        )
    }
}

/// Erasure coding policy for a block group: `data_units` data columns,
/// `parity_units` parity columns, striped in `cell_size`-byte cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcPolicy {
    /// Number of data units (D)
    pub data_units: usize,
    /// Number of parity units (P)
    pub parity_units: usize,
    /// Striping cell size in bytes (C)
    pub cell_size: usize,
}

impl EcPolicy {
    /// Create a new policy
    #[must_use]
    pub const fn new(data_units: usize, parity_units: usize, cell_size: usize) -> Self {
        Self {
            data_units,
            parity_units,
            cell_size,
        }
    }

    /// Total internal blocks per group (D + P)
    #[must_use]
    pub const fn total_units(&self) -> usize {
        self.data_units + self.parity_units
    }

    /// RS(6,3) with 1 MiB cells
    pub const RS_6_3_1MB: Self = Self::new(6, 3, 1024 * 1024);

    /// RS(3,2) with 64 KiB cells
    pub const RS_3_2_64K: Self = Self::new(3, 2, 64 * 1024);
}

impl fmt::Display for EcPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RS-{}-{}-{}k",
            self.data_units,
            self.parity_units,
            self.cell_size / 1024
        )
    }
}

/// A peer storage node: stable node id plus its data-transfer address
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Stable node identity
    pub node_id: Uuid,
    /// Data-transfer socket address
    pub addr: SocketAddr,
}

impl PeerInfo {
    /// Create a peer descriptor
    #[must_use]
    pub const fn new(node_id: Uuid, addr: SocketAddr) -> Self {
        Self { node_id, addr }
    }
}

impl fmt::Display for PeerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

/// Storage class a rebuilt block should land on
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageClass {
    /// Spinning disk
    #[default]
    Disk,
    /// Flash
    Ssd,
    /// Cold archival storage
    Archive,
    /// Externally provided storage
    Provided,
}

impl StorageClass {
    /// Wire code
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            Self::Disk => 0,
            Self::Ssd => 1,
            Self::Archive => 2,
            Self::Provided => 3,
        }
    }

    /// Decode from a wire code
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Disk),
            1 => Some(Self::Ssd),
            2 => Some(Self::Archive),
            3 => Some(Self::Provided),
            _ => None,
        }
    }
}

/// Access scope a block token grants
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    /// Read the block's bytes
    Read,
    /// Write / create the block
    Write,
}

impl AccessMode {
    /// Wire code
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            Self::Read => 1,
            Self::Write => 2,
        }
    }

    /// Decode from a wire code
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Read),
            2 => Some(Self::Write),
            _ => None,
        }
    }
}

/// Opaque block access token, issued by the node's token provider and
/// validated by the peer. The engine never looks inside it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockToken(Bytes);

impl BlockToken {
    /// Wrap raw token bytes
    #[must_use]
    pub fn new(raw: impl Into<Bytes>) -> Self {
        Self(raw.into())
    }

    /// Token bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Token length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the empty (insecure-cluster) token
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
