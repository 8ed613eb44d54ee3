//! Target-side adapters: the write-block channel and per-target state
//!
//! Each rebuilt internal block streams to one replacement peer through a
//! [`TargetChannel`]: TCP connect, WRITE-scoped handshake, a write-block
//! request, then data packets with contiguous `(offset, seq_no)` framing
//! and a final empty terminator. No acknowledgement is ever read; a
//! failed target goes permanently silent.

use std::time::Duration;
use stripefs_common::{
    AccessMode, BlockToken, ChecksumDescriptor, ExtendedBlock, PeerInfo, Result, StorageClass,
};
use stripefs_proto::{
    client_handshake, max_chunks_per_packet, write_packet, BlockStage, PacketHeader,
    WriteBlockRequest,
};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

use crate::reader::{timed, SliceBuf};

/// Outbound packet stream to one target peer.
pub(crate) struct TargetChannel {
    stream: BufWriter<TcpStream>,
    io_timeout: Duration,
    /// Byte offset of the next packet within the target block
    pub block_offset: u64,
    /// Sequence number of the next packet
    pub seq_no: u64,
}

impl TargetChannel {
    /// Connect to `peer`, authenticate for WRITE, and send the
    /// write-block request that opens the packet stream.
    #[allow(clippy::too_many_arguments)]
    pub async fn connect(
        peer: PeerInfo,
        block: ExtendedBlock,
        storage_class: StorageClass,
        source: PeerInfo,
        token: BlockToken,
        checksum: ChecksumDescriptor,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> Result<Self> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(peer.addr))
            .await
            .map_err(|_| stripefs_common::Error::ConnectTimeout {
                peer: peer.addr.to_string(),
            })??;
        let mut stream = BufWriter::new(stream);

        timed(io_timeout, async {
            client_handshake(&mut stream, &token, AccessMode::Write).await?;
            let request = WriteBlockRequest {
                block,
                storage_class,
                stage: BlockStage::PipelineSetupCreate,
                source,
                checksum,
            };
            request.write_to(&mut stream).await
        })
        .await?;

        Ok(Self {
            stream,
            io_timeout,
            block_offset: 0,
            seq_no: 0,
        })
    }

    /// Packetize and send one window of decoded bytes with its chunked
    /// checksums.
    pub async fn send_window(
        &mut self,
        data: &[u8],
        sums: &[u8],
        desc: &ChecksumDescriptor,
    ) -> Result<()> {
        let max_bytes = max_chunks_per_packet(desc) * desc.bytes_per_checksum as usize;
        let checksum_size = desc.checksum_size();
        let mut off = 0;
        let mut ck_off = 0;
        while off < data.len() {
            let to_write = (data.len() - off).min(max_bytes);
            let ck_len = desc.chunk_count(to_write) * checksum_size;
            let header = PacketHeader::data(
                self.block_offset,
                self.seq_no,
                ck_len as u32,
                to_write as u32,
            );
            timed(
                self.io_timeout,
                write_packet(
                    &mut self.stream,
                    &header,
                    &sums[ck_off..ck_off + ck_len],
                    &data[off..off + to_write],
                ),
            )
            .await?;
            self.seq_no += 1;
            self.block_offset += to_write as u64;
            off += to_write;
            ck_off += ck_len;
        }
        Ok(())
    }

    /// Send the empty terminator packet and flush the stream.
    pub async fn send_terminator(&mut self) -> Result<()> {
        let header = PacketHeader::terminator(self.block_offset, self.seq_no);
        timed(self.io_timeout, async {
            write_packet(&mut self.stream, &header, &[], &[]).await?;
            self.stream.flush().await?;
            Ok(())
        })
        .await?;
        self.seq_no += 1;
        Ok(())
    }
}

/// Per-target state owned by one reconstruction task.
pub(crate) struct Target {
    /// Internal block index being rebuilt
    pub index: u8,
    /// The replacement peer
    pub peer: PeerInfo,
    /// Where the peer should place the block
    pub storage_class: StorageClass,
    /// The internal block being rebuilt
    pub block: ExtendedBlock,
    /// A target that fails transfer is marked dead, skipped, and kept
    /// silent for the rest of the task.
    pub alive: bool,
    /// Open packet stream, if the initial connect succeeded
    pub chan: Option<TargetChannel>,
    /// Decoder output buffer (allocated once the slice size is known)
    pub buf: Option<SliceBuf>,
}

impl Target {
    pub fn new(index: u8, peer: PeerInfo, storage_class: StorageClass, block: ExtendedBlock) -> Self {
        Self {
            index,
            peer,
            storage_class,
            block,
            alive: false,
            chan: None,
            buf: None,
        }
    }
}
