//! Data packet framing
//!
//! Block bytes travel in packets of at most [`PACKET_MAX_BYTES`]:
//!
//! ```text
//! offset(8) seq_no(8) last(1) checksum_len(4) data_len(4) | checksums | data
//! ```
//!
//! `offset` is the packet's position in the block, `seq_no` counts
//! packets from 0 per stream, and the stream ends with an empty packet
//! whose `last` flag is set. The checksum section carries one word per
//! `bytes_per_checksum` chunk of the data section.

use bytes::Bytes;
use stripefs_common::{ChecksumDescriptor, Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a whole packet (header + checksums + data)
pub const PACKET_MAX_BYTES: usize = 64 * 1024;

/// Encoded header size
pub const PKT_MAX_HEADER_LEN: usize = 8 + 8 + 1 + 4 + 4;

/// Fixed packet header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketHeader {
    /// Byte position of this packet's data within the block
    pub offset_in_block: u64,
    /// Packet index within the stream, starting at 0
    pub seq_no: u64,
    /// Set on the empty terminator packet
    pub last_packet: bool,
    /// Bytes in the checksum section
    pub checksum_len: u32,
    /// Bytes in the data section
    pub data_len: u32,
}

impl PacketHeader {
    /// Header for a data-bearing packet
    #[must_use]
    pub const fn data(offset_in_block: u64, seq_no: u64, checksum_len: u32, data_len: u32) -> Self {
        Self {
            offset_in_block,
            seq_no,
            last_packet: false,
            checksum_len,
            data_len,
        }
    }

    /// Header for the empty terminator packet
    #[must_use]
    pub const fn terminator(offset_in_block: u64, seq_no: u64) -> Self {
        Self {
            offset_in_block,
            seq_no,
            last_packet: true,
            checksum_len: 0,
            data_len: 0,
        }
    }

    /// Encode onto a stream.
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<()> {
        w.write_u64(self.offset_in_block).await?;
        w.write_u64(self.seq_no).await?;
        w.write_u8(u8::from(self.last_packet)).await?;
        w.write_u32(self.checksum_len).await?;
        w.write_u32(self.data_len).await?;
        Ok(())
    }

    /// Decode from a stream.
    pub async fn read_from<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        let offset_in_block = r.read_u64().await?;
        let seq_no = r.read_u64().await?;
        let last_packet = match r.read_u8().await? {
            0 => false,
            1 => true,
            other => return Err(Error::Protocol(format!("bad last-packet flag {other}"))),
        };
        let checksum_len = r.read_u32().await?;
        let data_len = r.read_u32().await?;
        if checksum_len as usize + data_len as usize + PKT_MAX_HEADER_LEN > PACKET_MAX_BYTES {
            return Err(Error::Protocol(format!(
                "oversized packet: {checksum_len} checksum bytes + {data_len} data bytes"
            )));
        }
        Ok(Self {
            offset_in_block,
            seq_no,
            last_packet,
            checksum_len,
            data_len,
        })
    }
}

/// Data chunks that fit in one packet alongside their checksums, at
/// least one.
#[must_use]
pub fn max_chunks_per_packet(desc: &ChecksumDescriptor) -> usize {
    let chunk = desc.bytes_per_checksum as usize + desc.checksum_size();
    ((PACKET_MAX_BYTES - PKT_MAX_HEADER_LEN) / chunk).max(1)
}

/// Write one packet: header, checksum section, data section.
pub async fn write_packet<W: AsyncWrite + Unpin>(
    w: &mut W,
    header: &PacketHeader,
    sums: &[u8],
    data: &[u8],
) -> Result<()> {
    debug_assert_eq!(header.checksum_len as usize, sums.len());
    debug_assert_eq!(header.data_len as usize, data.len());
    header.write_to(w).await?;
    w.write_all(sums).await?;
    w.write_all(data).await?;
    Ok(())
}

/// Read one packet.
pub async fn read_packet<R: AsyncRead + Unpin>(r: &mut R) -> Result<(PacketHeader, Bytes, Bytes)> {
    let header = PacketHeader::read_from(r).await?;
    let mut sums = vec![0u8; header.checksum_len as usize];
    r.read_exact(&mut sums).await?;
    let mut data = vec![0u8; header.data_len as usize];
    r.read_exact(&mut data).await?;
    Ok((header, Bytes::from(sums), Bytes::from(data)))
}
