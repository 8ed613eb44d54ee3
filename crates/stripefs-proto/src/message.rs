//! Operation requests and wire helpers
//!
//! After the session handshake, the client sends exactly one operation:
//! read-block (the server answers with a status byte and its checksum
//! descriptor, then streams packets) or write-block (the server streams
//! packets *in* and never answers; reconstruction does not wait for
//! acks).

use std::net::SocketAddr;
use stripefs_common::{
    ChecksumDescriptor, ChecksumKind, Error, ExtendedBlock, PeerInfo, Result, StorageClass,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

// ── Operation codes ───────────────────────────────────────────────────────────

/// Create a block replica and stream its bytes in
pub const OP_WRITE_BLOCK: u8 = 80;
/// Stream a block's bytes out, starting at an offset
pub const OP_READ_BLOCK: u8 = 81;

// ── Status codes ──────────────────────────────────────────────────────────────

pub const STATUS_SUCCESS: u8 = 0;
pub const STATUS_ERROR: u8 = 1;
pub const STATUS_ACCESS_DENIED: u8 = 2;

/// Pipeline stage of a write-block request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockStage {
    /// Create a fresh replica (the only stage reconstruction uses)
    PipelineSetupCreate,
    /// Append to an existing replica
    PipelineSetupAppend,
    /// Recover and close a replica
    PipelineClose,
}

impl BlockStage {
    /// Wire code
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            Self::PipelineSetupCreate => 0,
            Self::PipelineSetupAppend => 1,
            Self::PipelineClose => 2,
        }
    }

    /// Decode from a wire code
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::PipelineSetupCreate),
            1 => Some(Self::PipelineSetupAppend),
            2 => Some(Self::PipelineClose),
            _ => None,
        }
    }
}

/// Read a stream of one internal block starting at `offset`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadBlockRequest {
    pub block: ExtendedBlock,
    pub offset: u64,
    pub length: u64,
}

/// Create an internal block replica on the receiving node
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteBlockRequest {
    pub block: ExtendedBlock,
    pub storage_class: StorageClass,
    pub stage: BlockStage,
    /// The node the bytes come from
    pub source: PeerInfo,
    /// Checksum framing of the packet stream that follows
    pub checksum: ChecksumDescriptor,
}

impl ReadBlockRequest {
    /// Send `OP_READ_BLOCK` followed by this request.
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<()> {
        w.write_u8(OP_READ_BLOCK).await?;
        write_block(w, &self.block).await?;
        w.write_u64(self.offset).await?;
        w.write_u64(self.length).await?;
        w.flush().await?;
        Ok(())
    }

    /// Decode the request body (the opcode has already been consumed).
    pub async fn read_from<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        let block = read_block(r).await?;
        let offset = r.read_u64().await?;
        let length = r.read_u64().await?;
        Ok(Self {
            block,
            offset,
            length,
        })
    }
}

impl WriteBlockRequest {
    /// Send `OP_WRITE_BLOCK` followed by this request.
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<()> {
        w.write_u8(OP_WRITE_BLOCK).await?;
        write_block(w, &self.block).await?;
        w.write_u8(self.storage_class.code()).await?;
        w.write_u8(self.stage.code()).await?;
        write_peer(w, &self.source).await?;
        write_checksum(w, &self.checksum).await?;
        w.flush().await?;
        Ok(())
    }

    /// Decode the request body (the opcode has already been consumed).
    pub async fn read_from<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        let block = read_block(r).await?;
        let storage_class = StorageClass::from_code(r.read_u8().await?)
            .ok_or_else(|| Error::protocol("unknown storage class"))?;
        let stage = BlockStage::from_code(r.read_u8().await?)
            .ok_or_else(|| Error::protocol("unknown block stage"))?;
        let source = read_peer(r).await?;
        let checksum = read_checksum(r).await?;
        Ok(Self {
            block,
            storage_class,
            stage,
            source,
            checksum,
        })
    }
}

/// Read the next operation code from a connection (server side).
pub async fn read_op<R: AsyncRead + Unpin>(r: &mut R) -> Result<u8> {
    Ok(r.read_u8().await?)
}

// ── Field codecs ──────────────────────────────────────────────────────────────

const MAX_STRING_LEN: usize = 4 * 1024;

async fn write_str<W: AsyncWrite + Unpin>(w: &mut W, s: &str) -> Result<()> {
    if s.len() > MAX_STRING_LEN {
        return Err(Error::protocol("string field too long"));
    }
    w.write_u16(s.len() as u16).await?;
    w.write_all(s.as_bytes()).await?;
    Ok(())
}

async fn read_str<R: AsyncRead + Unpin>(r: &mut R) -> Result<String> {
    let len = r.read_u16().await? as usize;
    if len > MAX_STRING_LEN {
        return Err(Error::protocol("string field too long"));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|_| Error::protocol("string field is not UTF-8"))
}

/// Encode an [`ExtendedBlock`].
pub async fn write_block<W: AsyncWrite + Unpin>(w: &mut W, block: &ExtendedBlock) -> Result<()> {
    write_str(w, &block.pool_id).await?;
    w.write_u64(block.block_id).await?;
    w.write_u64(block.generation_stamp).await?;
    w.write_u64(block.num_bytes).await?;
    Ok(())
}

/// Decode an [`ExtendedBlock`].
pub async fn read_block<R: AsyncRead + Unpin>(r: &mut R) -> Result<ExtendedBlock> {
    let pool_id = read_str(r).await?;
    let block_id = r.read_u64().await?;
    let generation_stamp = r.read_u64().await?;
    let num_bytes = r.read_u64().await?;
    Ok(ExtendedBlock {
        pool_id,
        block_id,
        generation_stamp,
        num_bytes,
    })
}

async fn write_peer<W: AsyncWrite + Unpin>(w: &mut W, peer: &PeerInfo) -> Result<()> {
    w.write_all(peer.node_id.as_bytes()).await?;
    write_str(w, &peer.addr.to_string()).await?;
    Ok(())
}

async fn read_peer<R: AsyncRead + Unpin>(r: &mut R) -> Result<PeerInfo> {
    let mut id = [0u8; 16];
    r.read_exact(&mut id).await?;
    let addr: SocketAddr = read_str(r)
        .await?
        .parse()
        .map_err(|_| Error::protocol("bad peer address"))?;
    Ok(PeerInfo::new(Uuid::from_bytes(id), addr))
}

/// Encode a [`ChecksumDescriptor`].
pub async fn write_checksum<W: AsyncWrite + Unpin>(
    w: &mut W,
    desc: &ChecksumDescriptor,
) -> Result<()> {
    w.write_u8(desc.kind.code()).await?;
    w.write_u32(desc.bytes_per_checksum).await?;
    Ok(())
}

/// Decode a [`ChecksumDescriptor`].
pub async fn read_checksum<R: AsyncRead + Unpin>(r: &mut R) -> Result<ChecksumDescriptor> {
    let kind = ChecksumKind::from_code(r.read_u8().await?)
        .ok_or_else(|| Error::protocol("unknown checksum kind"))?;
    let bytes_per_checksum = r.read_u32().await?;
    if bytes_per_checksum == 0 {
        return Err(Error::protocol("bytes_per_checksum must be nonzero"));
    }
    Ok(ChecksumDescriptor::new(kind, bytes_per_checksum))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> ExtendedBlock {
        ExtendedBlock::new("BP-test", 0x2000_0000, 1007, 6 * 1024 * 1024)
    }

    #[tokio::test]
    async fn test_read_request_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let req = ReadBlockRequest {
            block: sample_block(),
            offset: 4096,
            length: 1024 * 1024,
        };
        req.write_to(&mut a).await.unwrap();
        assert_eq!(read_op(&mut b).await.unwrap(), OP_READ_BLOCK);
        let got = ReadBlockRequest::read_from(&mut b).await.unwrap();
        assert_eq!(got, req);
    }

    #[tokio::test]
    async fn test_write_request_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let req = WriteBlockRequest {
            block: sample_block(),
            storage_class: StorageClass::Ssd,
            stage: BlockStage::PipelineSetupCreate,
            source: PeerInfo::new(Uuid::new_v4(), "127.0.0.1:9866".parse().unwrap()),
            checksum: ChecksumDescriptor::default(),
        };
        req.write_to(&mut a).await.unwrap();
        assert_eq!(read_op(&mut b).await.unwrap(), OP_WRITE_BLOCK);
        let got = WriteBlockRequest::read_from(&mut b).await.unwrap();
        assert_eq!(got, req);
    }

    #[tokio::test]
    async fn test_zero_bytes_per_checksum_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u8(ChecksumKind::Crc32c.code()).await.unwrap();
        a.write_u32(0).await.unwrap();
        assert!(read_checksum(&mut b).await.is_err());
    }
}
