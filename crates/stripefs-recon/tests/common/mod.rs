//! In-process peers for reconstruction tests
//!
//! Real TCP listeners speaking the data-transfer protocol: sources serve
//! internal block bytes (optionally corrupting, delaying, or refusing),
//! targets collect the packet streams the engine sends so tests can
//! check framing and content.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stripefs_common::{
    ChecksumDescriptor, EcPolicy, ExtendedBlock, PeerInfo, ReconstructionConfig, Result,
};
use stripefs_erasure::{internal_block_length, ErasureCodec, RsCodec};
use stripefs_proto::{
    max_chunks_per_packet, message, read_op, read_packet, respond, serve_handshake, write_packet,
    PacketHeader, ReadBlockRequest, WriteBlockRequest, OP_READ_BLOCK, OP_WRITE_BLOCK,
    STATUS_SUCCESS,
};
use stripefs_recon::{
    CorruptionReport, CorruptionReporter, ReconContext, ReconstructionCommand,
};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;

/// How a mock source treats its clients
#[derive(Clone, Copy, Debug)]
pub enum SourceBehavior {
    Normal,
    /// Flip a byte in the first packet of every connection
    Corrupt,
    /// Sleep before the first packet of every connection
    DelayFirstPacket(Duration),
}

/// A peer serving one internal block
pub struct MockSource {
    pub peer: PeerInfo,
    /// Connections accepted so far
    pub connections: Arc<AtomicUsize>,
}

pub async fn spawn_source(
    data: Vec<u8>,
    desc: ChecksumDescriptor,
    behavior: SourceBehavior,
) -> MockSource {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let peer = PeerInfo::new(Uuid::new_v4(), listener.local_addr().unwrap());
    let connections = Arc::new(AtomicUsize::new(0));
    let data = Arc::new(data);
    let conns = Arc::clone(&connections);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            conns.fetch_add(1, Ordering::SeqCst);
            let data = Arc::clone(&data);
            tokio::spawn(async move {
                let _ = serve_source_conn(stream, data, desc, behavior).await;
            });
        }
    });
    MockSource { peer, connections }
}

async fn serve_source_conn(
    mut stream: TcpStream,
    data: Arc<Vec<u8>>,
    desc: ChecksumDescriptor,
    behavior: SourceBehavior,
) -> Result<()> {
    serve_handshake(&mut stream).await?;
    respond(&mut stream, STATUS_SUCCESS).await?;
    assert_eq!(read_op(&mut stream).await?, OP_READ_BLOCK);
    let req = ReadBlockRequest::read_from(&mut stream).await?;
    stream.write_u8(STATUS_SUCCESS).await?;
    message::write_checksum(&mut stream, &desc).await?;

    if let SourceBehavior::DelayFirstPacket(delay) = behavior {
        tokio::time::sleep(delay).await;
    }

    let start = req.offset as usize;
    let end = ((req.offset + req.length) as usize).min(data.len());
    let max_bytes = max_chunks_per_packet(&desc) * desc.bytes_per_checksum as usize;
    let mut off = start;
    let mut seq = 0u64;
    let mut sums = Vec::new();
    let mut first = true;
    while off < end {
        let n = (end - off).min(max_bytes);
        let chunk = &data[off..off + n];
        desc.calculate_chunked(chunk, &mut sums);
        let mut payload = chunk.to_vec();
        if first && matches!(behavior, SourceBehavior::Corrupt) {
            payload[0] ^= 0xff;
        }
        first = false;
        let header = PacketHeader::data(off as u64, seq, sums.len() as u32, n as u32);
        write_packet(&mut stream, &header, &sums, &payload).await?;
        seq += 1;
        off += n;
    }
    write_packet(
        &mut stream,
        &PacketHeader::terminator(end as u64, seq),
        &[],
        &[],
    )
    .await?;
    stream.flush().await?;
    Ok(())
}

/// How a mock target treats its stream
#[derive(Clone, Copy, Debug)]
pub enum TargetBehavior {
    Normal,
    /// Close the connection once this many data bytes arrived
    FailAfter(usize),
}

/// One write-block stream as the target saw it
#[derive(Debug, Default)]
pub struct ReceivedStream {
    pub block: Option<ExtendedBlock>,
    pub packets: Vec<PacketHeader>,
    pub data: Vec<u8>,
    /// Saw the empty terminator packet
    pub finished: bool,
}

/// A replacement peer collecting what the engine sends
pub struct MockTarget {
    pub peer: PeerInfo,
    pub streams: Arc<Mutex<Vec<ReceivedStream>>>,
}

pub async fn spawn_target(behavior: TargetBehavior) -> MockTarget {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let peer = PeerInfo::new(Uuid::new_v4(), listener.local_addr().unwrap());
    let streams: Arc<Mutex<Vec<ReceivedStream>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&streams);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let sink = Arc::clone(&sink);
            tokio::spawn(async move {
                let _ = serve_target_conn(stream, sink, behavior).await;
            });
        }
    });
    MockTarget { peer, streams }
}

async fn serve_target_conn(
    mut stream: TcpStream,
    sink: Arc<Mutex<Vec<ReceivedStream>>>,
    behavior: TargetBehavior,
) -> Result<()> {
    serve_handshake(&mut stream).await?;
    respond(&mut stream, STATUS_SUCCESS).await?;
    assert_eq!(read_op(&mut stream).await?, OP_WRITE_BLOCK);
    let req = WriteBlockRequest::read_from(&mut stream).await?;
    let slot = {
        let mut streams = sink.lock();
        streams.push(ReceivedStream {
            block: Some(req.block.clone()),
            ..Default::default()
        });
        streams.len() - 1
    };
    loop {
        let (header, sums, data) = read_packet(&mut stream).await?;
        let total = {
            let mut streams = sink.lock();
            let entry = &mut streams[slot];
            entry.packets.push(header);
            if header.last_packet {
                entry.finished = true;
            } else {
                assert!(req.checksum.verify_chunked(&data, &sums));
                entry.data.extend_from_slice(&data);
            }
            entry.data.len()
        };
        if header.last_packet {
            return Ok(());
        }
        if let TargetBehavior::FailAfter(limit) = behavior {
            if total >= limit {
                // Drop the connection mid-stream.
                return Ok(());
            }
        }
    }
}

/// Build a block group's columns: deterministic data columns at their
/// geometry lengths, parity columns encoded over the zero-padded data.
pub fn make_group(policy: EcPolicy, num_bytes: u64, seed: u64) -> Vec<Vec<u8>> {
    let col_len = |i: usize| {
        internal_block_length(num_bytes, policy.cell_size, policy.data_units, i) as usize
    };
    let max_len = col_len(0);

    let mut state = seed | 1;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state as u8
    };

    let mut columns: Vec<Vec<u8>> = (0..policy.data_units)
        .map(|i| (0..col_len(i)).map(|_| next()).collect())
        .collect();

    let padded: Vec<Vec<u8>> = columns
        .iter()
        .map(|c| {
            let mut p = c.clone();
            p.resize(max_len, 0);
            p
        })
        .collect();
    let refs: Vec<&[u8]> = padded.iter().map(Vec::as_slice).collect();
    let mut codec = RsCodec::new(policy.data_units, policy.parity_units).unwrap();
    columns.extend(codec.encode(&refs).unwrap());
    columns
}

/// Corruption reporter that captures every report for inspection.
#[derive(Default)]
pub struct CapturingReporter(pub Mutex<Vec<CorruptionReport>>);

impl CorruptionReporter for CapturingReporter {
    fn report(&self, report: CorruptionReport) {
        self.0.lock().push(report);
    }
}

/// Context wired to a capturing corruption reporter.
pub fn test_context(config: ReconstructionConfig) -> (ReconContext, Arc<CapturingReporter>) {
    let reporter = Arc::new(CapturingReporter::default());
    let local = PeerInfo::new(Uuid::new_v4(), "127.0.0.1:9866".parse().unwrap());
    let mut ctx = ReconContext::new(local);
    ctx.config = config;
    ctx.corruption = Arc::clone(&reporter) as Arc<dyn CorruptionReporter>;
    (ctx, reporter)
}

/// A reconstruction order over mock peers.
pub fn command(
    group: ExtendedBlock,
    policy: EcPolicy,
    live: &[u8],
    sources: &[&MockSource],
    targets: &[&MockTarget],
) -> ReconstructionCommand {
    ReconstructionCommand {
        block_group: group,
        policy,
        live_indices: live.to_vec(),
        sources: sources.iter().map(|s| s.peer).collect(),
        targets: targets.iter().map(|t| t.peer).collect(),
        target_storage_classes: vec![Default::default(); targets.len()],
    }
}
