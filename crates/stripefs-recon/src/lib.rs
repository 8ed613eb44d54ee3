//! StripeFS Reconstruction - rebuilding lost erasure-coded blocks
//!
//! When internal blocks of a striped block group are lost, the cluster
//! controller orders a surviving storage node to rebuild them. This crate
//! is that engine: a [`ReconstructionWorker`] admits orders into a
//! bounded task pool, and each [`ReconstructionTask`] drives a windowed
//! pipeline over one block group:
//!
//! ```text
//! step 1: read one window from the minimum number of source peers,
//!         re-routing around slow or corrupt peers;
//! step 2: decode the missing columns for that window;
//! step 3: packetize and stream the decoded bytes to the target peers.
//! ```
//!
//! Slice reads from source peers share one bounded reader pool across all
//! tasks; when it is saturated, a read runs on the submitting task
//! instead of queueing without limit. Targets are write-only: like block
//! replication, the engine never waits for acknowledgements.

mod command;
mod context;
mod metrics;
mod reader;
mod target;
mod task;
mod worker;

pub use command::ReconstructionCommand;
pub use context::{
    BlockTokenProvider, CorruptEntry, CorruptionReport, CorruptionReporter, InsecureTokenProvider,
    LogCorruptionReporter, ReconContext,
};
pub use metrics::{ReconMetrics, XmitGuard};
pub use task::ReconstructionTask;
pub use worker::{ReaderPool, ReconstructionWorker};
