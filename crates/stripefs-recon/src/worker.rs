//! The reconstruction worker: pool lifecycle and admission of orders
//!
//! The worker hosts two bounded pools. The task pool runs whole
//! reconstruction tasks: admission is unbounded FIFO, execution is
//! capped at `striped_blk_threads` in flight. The reader pool caps
//! concurrent slice reads across *all* tasks at `striped_read_threads`;
//! it hands permits out directly and never queues, so a saturated pool
//! pushes the read back onto the submitting task instead.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::command::ReconstructionCommand;
use crate::context::ReconContext;
use crate::task::ReconstructionTask;

/// Direct-handoff permit pool shared by every task's slice reads.
pub struct ReaderPool {
    permits: Arc<Semaphore>,
}

impl ReaderPool {
    /// Pool allowing `max_readers` concurrent slice reads
    #[must_use]
    pub fn new(max_readers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_readers)),
        }
    }

    /// Take a read slot if one is free right now. `None` means the pool
    /// is saturated and the caller should run the read itself.
    #[must_use]
    pub fn try_permit(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.permits).try_acquire_owned().ok()
    }
}

/// Long-lived service handling reconstruction orders from the cluster
/// controller.
pub struct ReconstructionWorker {
    ctx: Arc<ReconContext>,
    reader_pool: Arc<ReaderPool>,
    task_slots: Arc<Semaphore>,
    tasks: tokio::sync::Mutex<JoinSet<()>>,
}

impl ReconstructionWorker {
    /// Build the worker and its two pools from the context's config.
    #[must_use]
    pub fn new(ctx: ReconContext) -> Self {
        debug!(
            "striped reads: pool size {}; striped block reconstruction: pool size {}",
            ctx.config.striped_read_threads, ctx.config.striped_blk_threads
        );
        let reader_pool = Arc::new(ReaderPool::new(ctx.config.striped_read_threads));
        let task_slots = Arc::new(Semaphore::new(ctx.config.striped_blk_threads));
        Self {
            ctx: Arc::new(ctx),
            reader_pool,
            task_slots,
            tasks: tokio::sync::Mutex::new(JoinSet::new()),
        }
    }

    /// The node context this worker runs under
    #[must_use]
    pub fn context(&self) -> &Arc<ReconContext> {
        &self.ctx
    }

    /// Admit a batch of reconstruction orders.
    ///
    /// Orders that cannot be set up, and orders with nothing to rebuild,
    /// are logged and dropped; neither aborts the rest of the batch.
    pub async fn process_commands(&self, commands: Vec<ReconstructionCommand>) {
        let mut tasks = self.tasks.lock().await;
        for command in commands {
            let label = command.block_group.to_string();
            match ReconstructionTask::new(
                command,
                Arc::clone(&self.ctx),
                Arc::clone(&self.reader_pool),
            ) {
                Ok(task) if task.has_valid_targets() => {
                    self.ctx.metrics.inc_tasks_submitted();
                    let slots = Arc::clone(&self.task_slots);
                    let metrics = Arc::clone(&self.ctx.metrics);
                    tasks.spawn(async move {
                        // Unbounded FIFO admission into a bounded pool.
                        let Ok(_slot) = slots.acquire_owned().await else {
                            return;
                        };
                        if let Err(e) = task.run().await {
                            metrics.inc_tasks_failed();
                            warn!("failed to reconstruct striped block {label}: {e}");
                        }
                    });
                }
                Ok(_) => {
                    warn!("no missing internal block with data; skipping reconstruction of {label}");
                }
                Err(e) => {
                    warn!("failed to set up reconstruction of {label}: {e}");
                }
            }
        }
    }

    /// Wait until every admitted task has finished. Mostly useful for
    /// orderly shutdown and tests.
    pub async fn wait_idle(&self) {
        let mut tasks = self.tasks.lock().await;
        while tasks.join_next().await.is_some() {}
    }

    /// Best-effort shutdown: abort in-flight tasks, dropping their
    /// sockets and channels. Does not wait for graceful completion.
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        self.task_slots.close();
    }
}
