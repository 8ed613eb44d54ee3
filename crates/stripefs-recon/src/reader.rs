//! Source-side adapters: slice buffers and the remote block reader
//!
//! A [`StripedReader`] is the per-source slot a task schedules reads
//! through: the internal block it serves, the peer holding it, an
//! optional open read channel, and a reusable slice buffer. A slot whose
//! channel is gone is dead for this task; a slot merely skipped this
//! iteration can be revived by reopening at the current position.

use bytes::{Buf, Bytes};
use std::future::Future;
use std::time::Duration;
use stripefs_common::{AccessMode, BlockToken, ChecksumDescriptor, Error, ExtendedBlock, PeerInfo, Result};
use stripefs_proto::{client_handshake, message, read_packet, ReadBlockRequest, STATUS_SUCCESS};
use tokio::io::{AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

/// Run `fut` under the node-global socket timeout.
pub(crate) async fn timed<T, F>(limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(Error::Timeout),
    }
}

/// A reusable read/decode buffer with a fill cursor.
///
/// Backing memory is allocated once and lives for the life of its owner;
/// clearing between windows resets the cursor, not the contents.
pub(crate) struct SliceBuf {
    pub data: Vec<u8>,
    pub filled: usize,
}

impl SliceBuf {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            filled: 0,
        }
    }

    /// Reset the cursor for the next window.
    pub fn reset(&mut self) {
        self.filled = 0;
    }

    /// Zero-fill `filled..window` so the window slice is valid decoder
    /// input even when the source block ended short.
    pub fn pad_to(&mut self, window: usize) {
        if self.filled < window {
            self.data[self.filled..window].fill(0);
        }
    }

    /// The first `window` bytes.
    pub fn window_slice(&self, window: usize) -> &[u8] {
        &self.data[..window]
    }
}

/// Streaming read channel for one internal block on one peer.
///
/// Connects, authenticates with a READ-scoped token, requests the block
/// from `offset`, and then yields its bytes packet by packet, verifying
/// the chunked checksums of every packet. Dropping it closes the socket.
pub(crate) struct RemoteBlockReader {
    stream: BufReader<TcpStream>,
    descriptor: ChecksumDescriptor,
    block: ExtendedBlock,
    source: PeerInfo,
    io_timeout: Duration,
    /// Unconsumed remainder of the current packet
    pending: Bytes,
    /// Next expected packet offset within the block
    next_offset: u64,
    /// Saw the terminator packet
    done: bool,
}

impl RemoteBlockReader {
    /// Open a read channel for `block` at `offset` on `source`.
    pub async fn connect(
        block: ExtendedBlock,
        offset: u64,
        source: PeerInfo,
        token: BlockToken,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> Result<Self> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(source.addr))
            .await
            .map_err(|_| Error::ConnectTimeout {
                peer: source.addr.to_string(),
            })??;
        let mut stream = BufReader::new(stream);

        let descriptor = timed(io_timeout, async {
            client_handshake(&mut stream, &token, AccessMode::Read).await?;
            let request = ReadBlockRequest {
                block: block.clone(),
                offset,
                length: block.num_bytes.saturating_sub(offset),
            };
            request.write_to(&mut stream).await?;

            match stream.read_u8().await? {
                STATUS_SUCCESS => message::read_checksum(&mut stream).await,
                status => Err(Error::Protocol(format!(
                    "read-block rejected with status {status}"
                ))),
            }
        })
        .await?;

        Ok(Self {
            stream,
            descriptor,
            block,
            source,
            io_timeout,
            pending: Bytes::new(),
            next_offset: offset,
            done: false,
        })
    }

    /// Checksum framing advertised by the peer
    pub fn descriptor(&self) -> &ChecksumDescriptor {
        &self.descriptor
    }

    /// The internal block this channel serves
    pub fn block(&self) -> &ExtendedBlock {
        &self.block
    }

    /// The peer on the other end
    pub fn source(&self) -> &PeerInfo {
        &self.source
    }

    /// Fill `buf` with up to `len` bytes from the stream.
    ///
    /// Stops early only at end-of-block (terminator packet); the caller
    /// zero-pads short fills before decoding.
    pub async fn read_slice(&mut self, buf: &mut SliceBuf, len: usize) -> Result<()> {
        buf.reset();
        while buf.filled < len {
            if !self.pending.is_empty() {
                let n = (len - buf.filled).min(self.pending.len());
                buf.data[buf.filled..buf.filled + n].copy_from_slice(&self.pending[..n]);
                self.pending.advance(n);
                buf.filled += n;
                continue;
            }
            if self.done {
                break;
            }
            self.next_packet().await?;
        }
        Ok(())
    }

    /// Pull and verify the next packet into `pending`.
    async fn next_packet(&mut self) -> Result<()> {
        let (header, sums, data) =
            timed(self.io_timeout, read_packet(&mut self.stream)).await?;
        if header.last_packet {
            self.done = true;
            return Ok(());
        }
        if data.is_empty() {
            return Err(Error::protocol("empty non-terminal packet"));
        }
        if header.offset_in_block != self.next_offset {
            return Err(Error::Protocol(format!(
                "packet offset {} does not follow {}",
                header.offset_in_block, self.next_offset
            )));
        }
        if !self.descriptor.verify_chunked(&data, &sums) {
            debug!(
                "checksum mismatch in packet at {} of {}",
                header.offset_in_block, self.block
            );
            return Err(Error::ChecksumMismatch {
                block: self.block.to_string(),
                source_addr: self.source.to_string(),
            });
        }
        self.next_offset += data.len() as u64;
        self.pending = data;
        Ok(())
    }
}

/// Per-source read state owned by one reconstruction task.
///
/// Slots are created in source order and never removed; `chan: None`
/// marks a reader that failed and must not be read again without a
/// reopen. Buffers are allocated once the task knows its slice size and
/// reused for every window.
pub(crate) struct StripedReader {
    /// Internal block index this source holds
    pub index: u8,
    /// The internal block itself
    pub block: ExtendedBlock,
    /// The peer holding it
    pub source: PeerInfo,
    /// Open read channel, if any
    pub chan: Option<RemoteBlockReader>,
    /// Reusable slice buffer (absent while a read is in flight)
    pub buf: Option<SliceBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_buf_pad() {
        let mut buf = SliceBuf::new(16);
        buf.data[..4].copy_from_slice(&[1, 2, 3, 4]);
        buf.filled = 4;
        // Simulate garbage from an earlier window beyond the fill.
        buf.data[5] = 0xee;
        buf.pad_to(8);
        assert_eq!(buf.window_slice(8), &[1, 2, 3, 4, 0, 0, 0, 0]);
    }

    #[test]
    fn test_slice_buf_reset_keeps_capacity() {
        let mut buf = SliceBuf::new(8);
        buf.filled = 8;
        buf.reset();
        assert_eq!(buf.filled, 0);
        assert_eq!(buf.data.len(), 8);
    }
}
