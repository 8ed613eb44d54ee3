//! The reconstruction task: one block group, end to end
//!
//! ```text
//! | <- striped block group -> |
//!  blk_0      blk_1       blk_2(*)   blk_3   ...
//!    |          |           |          |
//!    v          v           v          v
//! +------+   +------+   +------+   +------+
//! |cell_0|   |cell_1|   |cell_2|   |cell_3|  ...
//! +------+   +------+   +------+   +------+
//! |cell_4|   |cell_5|   |cell_6|   |cell_7|  ...
//! +------+   +------+   +------+   +------+
//! ```
//!
//! Per window of at most the slice size, the task (1) reads the window
//! from the minimum number of sources required to decode, (2) decodes
//! every live target column, (3) packetizes the decoded bytes to the
//! target streams, then advances. The set of sources that delivered last
//! window is tried first next window; corrupt, failed, or slow sources
//! are routed around by opening a source not tried yet, or by reopening
//! one that was merely skipped.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;
use stripefs_common::{
    AccessMode, ChecksumDescriptor, EcPolicy, Error, ExtendedBlock, PeerInfo, Result,
};
use stripefs_erasure::{
    construct_internal_block, internal_block_length, min_required_sources, ErasureCodec, RsCodec,
};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::command::ReconstructionCommand;
use crate::context::{CorruptionReport, ReconContext};
use crate::reader::{RemoteBlockReader, SliceBuf, StripedReader};
use crate::target::{Target, TargetChannel};
use crate::worker::ReaderPool;

/// Result of one slice read, carrying the channel and buffer back to
/// their reader slot. A failed read comes back without its channel: the
/// slot is dead until a reopen.
struct SliceOutcome {
    idx: usize,
    chan: Option<RemoteBlockReader>,
    buf: SliceBuf,
    err: Option<Error>,
}

/// Read exactly one slice; on checksum mismatch, record the corrupt
/// replica before reporting failure.
async fn slice_read(
    idx: usize,
    mut chan: RemoteBlockReader,
    mut buf: SliceBuf,
    len: usize,
    report: Arc<Mutex<CorruptionReport>>,
) -> SliceOutcome {
    match chan.read_slice(&mut buf, len).await {
        Ok(()) => SliceOutcome {
            idx,
            chan: Some(chan),
            buf,
            err: None,
        },
        Err(err) => {
            if err.is_checksum_error() {
                warn!(
                    "checksum error reading {} from {}",
                    chan.block(),
                    chan.source()
                );
                report.lock().add(chan.block().clone(), *chan.source());
            }
            SliceOutcome {
                idx,
                chan: None,
                buf,
                err: Some(err),
            }
        }
    }
}

/// In-flight state of one windowed read iteration
struct ReadPhase {
    join: JoinSet<SliceOutcome>,
    /// Completions from reads that ran on the task itself (reader pool
    /// saturated)
    inline: VecDeque<SliceOutcome>,
    pending: usize,
    /// Sources already tried this iteration
    used: Vec<bool>,
    new_success: Vec<usize>,
}

/// Rebuilds the missing internal blocks of one striped block group and
/// streams them to the replacement peers. Owns every reader channel,
/// buffer, and target stream it creates; all of it is released when the
/// task finishes, whatever the outcome.
pub struct ReconstructionTask {
    ctx: Arc<ReconContext>,
    reader_pool: Arc<ReaderPool>,

    block_group: ExtendedBlock,
    policy: EcPolicy,
    min_required: usize,

    // Sources: reader slots are created lazily, in source order.
    live_indices: Vec<u8>,
    sources: Vec<PeerInfo>,
    readers: Vec<StripedReader>,
    /// Sticky list of reader slots that delivered last window
    success: Vec<usize>,

    // Missing internal indices with zero length contribute all-zeros
    // columns to the decoder instead of reads.
    zero_stripe_indices: Vec<u8>,
    zero_stripe_bufs: Vec<SliceBuf>,

    targets: Vec<Target>,

    decoder: Option<Box<dyn ErasureCodec>>,
    /// Checksum framing lifted from the first source that answered
    checksum: Option<ChecksumDescriptor>,
    checksum_scratch: Vec<u8>,
    /// Slice size: the configured read buffer rounded down to a checksum
    /// chunk multiple (0 until the first source answers)
    buffer_size: usize,
    pos_in_block: u64,
}

impl ReconstructionTask {
    /// Set up a task from a controller order. Does no I/O.
    pub fn new(
        command: ReconstructionCommand,
        ctx: Arc<ReconContext>,
        reader_pool: Arc<ReaderPool>,
    ) -> Result<Self> {
        command.validate()?;
        let ReconstructionCommand {
            block_group,
            policy,
            live_indices,
            sources,
            targets,
            target_storage_classes,
        } = command;

        let min_required = min_required_sources(
            block_group.num_bytes,
            policy.cell_size,
            policy.data_units,
        );

        // Walk the gap between 0..D+P and the live indices: missing
        // columns with data become targets (in index order, paired with
        // the target peers in order), empty ones become zero-stripes.
        let total = policy.total_units();
        let mut live = vec![false; total];
        for &i in &live_indices {
            live[i as usize] = true;
        }
        let mut target_slots = Vec::with_capacity(targets.len());
        let mut zero_stripe_indices = Vec::new();
        for i in 0..total {
            if live[i] {
                continue;
            }
            let len =
                internal_block_length(block_group.num_bytes, policy.cell_size, policy.data_units, i);
            if len > 0 {
                if target_slots.len() < targets.len() {
                    let block = construct_internal_block(
                        &block_group,
                        policy.cell_size,
                        policy.data_units,
                        i,
                    );
                    target_slots.push(Target::new(
                        i as u8,
                        targets[target_slots.len()],
                        target_storage_classes[target_slots.len()],
                        block,
                    ));
                }
            } else {
                zero_stripe_indices.push(i as u8);
            }
        }

        Ok(Self {
            ctx,
            reader_pool,
            block_group,
            policy,
            min_required,
            live_indices,
            sources,
            readers: Vec::new(),
            success: Vec::new(),
            zero_stripe_indices,
            zero_stripe_bufs: Vec::new(),
            targets: target_slots,
            decoder: None,
            checksum: None,
            checksum_scratch: Vec::new(),
            buffer_size: 0,
            pos_in_block: 0,
        })
    }

    /// False when every missing internal block is empty; such orders are
    /// dropped by the worker.
    #[must_use]
    pub fn has_valid_targets(&self) -> bool {
        !self.targets.is_empty()
    }

    /// The block group this task rebuilds
    #[must_use]
    pub fn block_group(&self) -> &ExtendedBlock {
        &self.block_group
    }

    /// Run the task to completion. Every channel and stream the task
    /// opened is closed on return, success or not.
    pub async fn run(mut self) -> Result<()> {
        let _xmit = self.ctx.metrics.xmit_guard();
        debug!(
            "reconstructing {} with {}: {} live sources, {} targets",
            self.block_group,
            self.policy,
            self.sources.len(),
            self.targets.len()
        );

        // Seed the sticky success list: try sources in order until the
        // minimum required have an open channel.
        let mut i = 0;
        while i < self.sources.len() && self.success.len() < self.min_required {
            self.add_striped_reader(i, 0).await;
            if self.readers[i].chan.is_some() {
                self.success.push(i);
            }
            i += 1;
        }
        if self.success.len() < self.min_required {
            return Err(Error::InsufficientSources {
                have: self.success.len(),
                need: self.min_required,
                block_id: self.block_group.block_id,
            });
        }
        let checksum = self
            .checksum
            .ok_or_else(|| Error::protocol("no checksum configuration after source setup"))?;
        let buffer_size = self.buffer_size;

        // Zero-stripe and target buffers share the slice size and are
        // allocated exactly once.
        self.zero_stripe_bufs = self
            .zero_stripe_indices
            .iter()
            .map(|_| SliceBuf::new(buffer_size))
            .collect();
        for target in &mut self.targets {
            target.buf = Some(SliceBuf::new(buffer_size));
        }

        // Open the target streams; targets that refuse are dead from the
        // start.
        let mut alive = 0;
        for target in &mut self.targets {
            let token = self.ctx.tokens.block_token(&target.block, AccessMode::Write);
            match TargetChannel::connect(
                target.peer,
                target.block.clone(),
                target.storage_class,
                self.ctx.local,
                token,
                checksum,
                self.ctx.config.socket_timeout(),
                self.ctx.config.socket_timeout(),
            )
            .await
            {
                Ok(chan) => {
                    target.chan = Some(chan);
                    target.alive = true;
                    alive += 1;
                }
                Err(e) => warn!("failed to open target stream to {}: {e}", target.peer),
            }
        }
        if alive == 0 {
            return Err(Error::AllTargetsFailed {
                block_id: self.block_group.block_id,
            });
        }

        let max_target_length = self
            .targets
            .iter()
            .map(|t| t.block.num_bytes)
            .max()
            .unwrap_or(0);

        while self.pos_in_block < max_target_length {
            let window = (max_target_length - self.pos_in_block).min(buffer_size as u64) as usize;

            // Step 1: read the window from the minimum number of
            // sources. Corrupt replicas observed along the way go to the
            // controller whether or not the read phase succeeded.
            let report = Arc::new(Mutex::new(CorruptionReport::default()));
            let read_result = self.read_minimum_sources(window, &report).await;
            let report = mem::take(&mut *report.lock());
            if !report.is_empty() {
                self.ctx.corruption.report(report);
            }
            read_result?;

            // Step 2: decode the live target columns.
            self.reconstruct_targets(window)?;

            // Step 3: ship the decoded bytes.
            if self.transfer().await == 0 {
                return Err(Error::AllTargetsFailed {
                    block_id: self.block_group.block_id,
                });
            }

            self.clear_buffers();
            self.pos_in_block += window as u64;
        }

        // Close every surviving stream with an empty terminator. Dead
        // targets stay silent.
        for target in self.targets.iter_mut().filter(|t| t.alive) {
            if let Some(chan) = target.chan.as_mut() {
                if let Err(e) = chan.send_terminator().await {
                    warn!("failed to finish target stream to {}: {e}", target.peer);
                }
            }
        }
        Ok(())
    }

    /// Bytes to read from reader `j` this window: the window clamped to
    /// what remains of that source's internal block.
    fn read_len(&self, j: usize, window: usize) -> usize {
        let remaining = self.readers[j].block.num_bytes.saturating_sub(self.pos_in_block);
        remaining.min(window as u64) as usize
    }

    /// Create the reader slot for source `j` and try to open its channel
    /// at `offset`. The slot is appended whether or not the open worked.
    async fn add_striped_reader(&mut self, j: usize, offset: u64) {
        let index = self.live_indices[j];
        let block = construct_internal_block(
            &self.block_group,
            self.policy.cell_size,
            self.policy.data_units,
            index as usize,
        );
        let source = self.sources[j];
        let chan = self.open_channel(&block, offset, &source).await;
        let buf = (self.buffer_size > 0).then(|| SliceBuf::new(self.buffer_size));
        self.readers.push(StripedReader {
            index,
            block,
            source,
            chan,
            buf,
        });
    }

    /// Open a read channel, fixing the task's checksum configuration on
    /// the first success and rejecting peers that disagree with it.
    async fn open_channel(
        &mut self,
        block: &ExtendedBlock,
        offset: u64,
        source: &PeerInfo,
    ) -> Option<RemoteBlockReader> {
        if offset >= block.num_bytes {
            return None;
        }
        let token = self.ctx.tokens.block_token(block, AccessMode::Read);
        let connect_timeout = self.ctx.config.socket_timeout();
        let io_timeout = self.ctx.config.socket_timeout();
        match RemoteBlockReader::connect(
            block.clone(),
            offset,
            *source,
            token,
            connect_timeout,
            io_timeout,
        )
        .await
        {
            Ok(chan) => match self.checksum {
                None => {
                    let desc = *chan.descriptor();
                    self.checksum = Some(desc);
                    self.buffer_size =
                        self.ctx.config.aligned_buffer_size(desc.bytes_per_checksum as usize);
                    debug!(
                        "using {:?} every {} bytes, slice size {}",
                        desc.kind, desc.bytes_per_checksum, self.buffer_size
                    );
                    Some(chan)
                }
                Some(desc) if desc == *chan.descriptor() => Some(chan),
                Some(_) => {
                    debug!("{source} advertises a different checksum configuration; skipping it");
                    None
                }
            },
            Err(e) => {
                debug!("failed to create remote block reader for {block} on {source}: {e}");
                None
            }
        }
    }

    /// Read one window from `min_required` sources, preferring last
    /// window's winners and replacing failed or slow readers as
    /// completions come in.
    async fn read_minimum_sources(
        &mut self,
        window: usize,
        report: &Arc<Mutex<CorruptionReport>>,
    ) -> Result<()> {
        let timeout = self.ctx.config.striped_read_timeout();
        let mut phase = ReadPhase {
            join: JoinSet::new(),
            inline: VecDeque::new(),
            pending: 0,
            used: vec![false; self.sources.len()],
            new_success: Vec::with_capacity(self.min_required),
        };

        // Submit a read for every sticky slot. An exhausted source
        // satisfies its slot without a read.
        let success = mem::take(&mut self.success);
        for &j in &success {
            let to_read = self.read_len(j, window);
            if to_read == 0 {
                if let Some(buf) = self.readers[j].buf.as_mut() {
                    buf.reset();
                }
                phase.new_success.push(j);
            } else {
                self.submit_read(&mut phase, j, to_read, report).await;
            }
            phase.used[j] = true;
        }

        while phase.new_success.len() < self.min_required {
            let outcome = if let Some(outcome) = phase.inline.pop_front() {
                outcome
            } else if phase.pending == 0 {
                // Nothing left in flight and no replacement to be had.
                break;
            } else {
                match tokio::time::timeout(timeout, phase.join.join_next()).await {
                    Err(_) => {
                        // A slow read is not aborted: it may still finish
                        // and win the race against its replacement.
                        debug!(
                            "slice read exceeded {}ms; scheduling a replacement",
                            timeout.as_millis()
                        );
                        if let Some(j) = self.schedule_new_read(&mut phase, window, report).await {
                            phase.new_success.push(j);
                        }
                        continue;
                    }
                    Ok(None) => {
                        phase.pending = 0;
                        continue;
                    }
                    Ok(Some(Err(e))) => {
                        phase.pending -= 1;
                        warn!("slice read task aborted: {e}");
                        continue;
                    }
                    Ok(Some(Ok(outcome))) => {
                        phase.pending -= 1;
                        outcome
                    }
                }
            };

            let j = outcome.idx;
            match outcome.err {
                None => {
                    let reader = &mut self.readers[j];
                    reader.chan = outcome.chan;
                    reader.buf = Some(outcome.buf);
                    phase.new_success.push(j);
                }
                Some(e) => {
                    // The reader's channel died with the read; the slot
                    // can only come back through a reopen.
                    let reader = &mut self.readers[j];
                    reader.chan = None;
                    reader.buf = Some(outcome.buf);
                    info!("slice read from {} failed: {e}", reader.source);
                    if let Some(j) = self.schedule_new_read(&mut phase, window, report).await {
                        phase.new_success.push(j);
                    }
                }
            }
        }

        // Reads still in flight lose the race; their buffers die with
        // them and the slots get fresh ones on revival.
        phase.join.abort_all();

        if phase.new_success.len() < self.min_required {
            return Err(Error::InsufficientSources {
                have: phase.new_success.len(),
                need: self.min_required,
                block_id: self.block_group.block_id,
            });
        }
        self.success = phase.new_success;
        Ok(())
    }

    /// Find a source to fill a vacated slot: first a source never tried,
    /// then a reader merely skipped this iteration (reopened at the
    /// current position). Returns `Some(slot)` when the source's block is
    /// already exhausted and the slot is satisfied without a read;
    /// `None` when a read was scheduled (or no candidate exists).
    async fn schedule_new_read(
        &mut self,
        phase: &mut ReadPhase,
        window: usize,
        report: &Arc<Mutex<CorruptionReport>>,
    ) -> Option<usize> {
        // Step 1: a source with no reader slot yet.
        let mut chosen = None;
        let mut m = self.readers.len();
        while chosen.is_none() && m < self.sources.len() {
            self.add_striped_reader(m, self.pos_in_block).await;
            let to_read = self.read_len(m, window);
            if to_read == 0 {
                phase.used[m] = true;
                if let Some(buf) = self.readers[m].buf.as_mut() {
                    buf.reset();
                }
                return Some(m);
            }
            if self.readers[m].chan.is_some() {
                chosen = Some(m);
            } else {
                m += 1;
            }
        }

        // Step 2: revisit a reader we skipped this iteration, reopening
        // its channel at the current position.
        if chosen.is_none() {
            for i in 0..self.readers.len() {
                if phase.used[i] {
                    continue;
                }
                let to_read = self.read_len(i, window);
                if to_read == 0 {
                    phase.used[i] = true;
                    if let Some(buf) = self.readers[i].buf.as_mut() {
                        buf.reset();
                    }
                    return Some(i);
                }
                self.readers[i].chan = None;
                let block = self.readers[i].block.clone();
                let source = self.readers[i].source;
                if let Some(chan) = self.open_channel(&block, self.pos_in_block, &source).await {
                    let reader = &mut self.readers[i];
                    reader.chan = Some(chan);
                    if let Some(buf) = reader.buf.as_mut() {
                        buf.reset();
                    }
                    chosen = Some(i);
                    break;
                }
            }
        }

        // Step 3: schedule the real read.
        if let Some(i) = chosen {
            let to_read = self.read_len(i, window);
            self.submit_read(phase, i, to_read, report).await;
            phase.used[i] = true;
        }
        None
    }

    /// Hand a slice read to the reader pool, or run it here when the
    /// pool is saturated (back-pressure, not an error).
    async fn submit_read(
        &mut self,
        phase: &mut ReadPhase,
        j: usize,
        len: usize,
        report: &Arc<Mutex<CorruptionReport>>,
    ) {
        let reader = &mut self.readers[j];
        let Some(chan) = reader.chan.take() else {
            debug!("reader {j} has no open channel; cannot submit a read");
            return;
        };
        let mut buf = match reader.buf.take() {
            Some(buf) => buf,
            None => SliceBuf::new(self.buffer_size),
        };
        buf.reset();
        let fut = slice_read(j, chan, buf, len, Arc::clone(report));
        match self.reader_pool.try_permit() {
            Some(permit) => {
                phase.join.spawn(async move {
                    let _permit = permit;
                    fut.await
                });
                phase.pending += 1;
            }
            None => {
                info!("reader pool saturated; running slice read on the task");
                phase.inline.push_back(fut.await);
            }
        }
    }

    /// Decode the live target columns for this window.
    fn reconstruct_targets(&mut self, window: usize) -> Result<()> {
        if self.decoder.is_none() {
            let codec = RsCodec::new(self.policy.data_units, self.policy.parity_units)
                .map_err(Error::from)?;
            self.decoder = Some(Box::new(codec));
        }

        // Success buffers may have fewer than `window` bytes at the end
        // of their source block; the decoder wants full columns.
        for &j in &self.success {
            if let Some(buf) = self.readers[j].buf.as_mut() {
                buf.pad_to(window);
            }
        }

        let total = self.policy.total_units();
        let mut inputs: Vec<Option<&[u8]>> = vec![None; total];
        for &j in &self.success {
            let reader = &self.readers[j];
            let buf = reader
                .buf
                .as_ref()
                .ok_or_else(|| Error::protocol("reader buffer missing at decode"))?;
            inputs[reader.index as usize] = Some(buf.window_slice(window));
        }
        for (zi, zbuf) in self.zero_stripe_indices.iter().zip(&self.zero_stripe_bufs) {
            inputs[*zi as usize] = Some(zbuf.window_slice(window));
        }

        let mut erased = Vec::with_capacity(self.targets.len());
        let mut outputs: Vec<&mut [u8]> = Vec::with_capacity(self.targets.len());
        for target in self.targets.iter_mut() {
            if !target.alive {
                continue;
            }
            erased.push(target.index as usize);
            let buf = target
                .buf
                .as_mut()
                .ok_or_else(|| Error::protocol("target buffer missing at decode"))?;
            outputs.push(&mut buf.data[..window]);
        }

        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| Error::protocol("decoder missing"))?;
        decoder
            .decode(&inputs, &erased, &mut outputs)
            .map_err(Error::from)?;

        // A target block may end inside (or before) this window; trim its
        // output to the remaining length.
        for target in self.targets.iter_mut().filter(|t| t.alive) {
            let remaining = target.block.num_bytes.saturating_sub(self.pos_in_block);
            if let Some(buf) = target.buf.as_mut() {
                buf.filled = remaining.min(window as u64) as usize;
            }
        }
        Ok(())
    }

    /// Send this window's output to every live target. Returns how many
    /// targets took their bytes; a target that fails is dead for the
    /// rest of the task and is never retried.
    async fn transfer(&mut self) -> usize {
        let Some(desc) = self.checksum else {
            return 0;
        };
        let mut sums = mem::take(&mut self.checksum_scratch);
        let mut delivered = 0;
        for target in self.targets.iter_mut() {
            if !target.alive {
                continue;
            }
            let Some(buf) = target.buf.as_ref() else {
                continue;
            };
            if buf.filled == 0 {
                continue;
            }
            let Some(chan) = target.chan.as_mut() else {
                target.alive = false;
                continue;
            };
            let data = &buf.data[..buf.filled];
            desc.calculate_chunked(data, &mut sums);
            match chan.send_window(data, &sums, &desc).await {
                Ok(()) => {
                    self.ctx.metrics.add_bytes_reconstructed(data.len() as u64);
                    delivered += 1;
                }
                Err(e) => {
                    warn!("transfer to target {} failed: {e}", target.peer);
                    target.alive = false;
                }
            }
        }
        self.checksum_scratch = sums;
        delivered
    }

    /// Reset every buffer cursor for the next window. Contents are not
    /// re-zeroed; padding re-extends the active region as needed.
    fn clear_buffers(&mut self) {
        for reader in &mut self.readers {
            if let Some(buf) = reader.buf.as_mut() {
                buf.reset();
            }
        }
        for zbuf in &mut self.zero_stripe_bufs {
            zbuf.reset();
        }
        for target in &mut self.targets {
            if let Some(buf) = target.buf.as_mut() {
                buf.reset();
            }
        }
    }
}
