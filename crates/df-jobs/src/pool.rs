//! Fixed-size pool of worker tasks.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::queue::JobQueue;
use crate::worker::{process_job, Envelope, WorkerContext};

/// N worker tasks pulling from one [`JobQueue`].
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
    ctx: WorkerContext,
}

impl WorkerPool {
    /// Spawn `workers` tasks (at least one) on the current runtime.
    pub fn start(workers: usize, queue: Arc<JobQueue<Envelope>>, ctx: WorkerContext) -> Self {
        let cancel = CancellationToken::new();
        let handles = (0..workers.max(1))
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    Arc::clone(&queue),
                    ctx.clone(),
                    cancel.child_token(),
                ))
            })
            .collect();

        tracing::info!(workers = workers.max(1), "Worker pool started");
        Self {
            handles,
            cancel,
            ctx,
        }
    }

    pub fn workers(&self) -> usize {
        self.handles.len()
    }

    /// Workers currently processing a job.
    pub fn busy(&self) -> usize {
        self.ctx.busy.load(Ordering::SeqCst)
    }

    /// Signal every worker to stop once the queue is drained, then wait for
    /// all of them. Close the queue first so nothing new arrives.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("Worker task failed: {e}");
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

/// One worker: take a job, process it, repeat.
///
/// Exits when the queue is closed and empty, or after cancellation once every
/// already-queued job has been drained.
async fn run_worker(
    id: usize,
    queue: Arc<JobQueue<Envelope>>,
    ctx: WorkerContext,
    cancel: CancellationToken,
) {
    tracing::debug!(worker = id, "Worker started");

    loop {
        tokio::select! {
            biased;
            next = queue.dequeue() => match next {
                Some(envelope) => process_job(&ctx, envelope).await,
                None => break,
            },
            _ = cancel.cancelled() => {
                while let Some(envelope) = queue.try_dequeue().await {
                    process_job(&ctx, envelope).await;
                }
                break;
            }
        }
    }

    tracing::debug!(worker = id, "Worker stopped");
}
