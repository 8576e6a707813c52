//! Worker pool draining the job queue.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

use crate::executor::SyncExecutor;
use crate::queue::JobQueue;

/// A fixed set of tasks, each running one job at a time.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `count` workers (at least one) on the current runtime.
    pub fn spawn(count: usize, queue: Arc<JobQueue>, executor: Arc<SyncExecutor>) -> Self {
        let count = count.max(1);
        info!(workers = count, "Starting sync workers");
        let handles = (0..count)
            .map(|worker| {
                let queue = Arc::clone(&queue);
                let executor = Arc::clone(&executor);
                tokio::spawn(work(worker, queue, executor))
            })
            .collect();
        Self { queue, handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Closes the queue and waits for in-flight jobs to finish.
    pub async fn shutdown(self) {
        self.queue.close();
        info!("Waiting for in-flight sync jobs to complete...");
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Sync worker panicked");
            }
        }
        info!("Sync workers stopped");
    }
}

#[instrument(skip(queue, executor))]
async fn work(worker: usize, queue: Arc<JobQueue>, executor: Arc<SyncExecutor>) {
    while let Some(job) = queue.dequeue().await {
        let job_id = job.job_id;
        if let Err(e) = executor.execute(job).await {
            error!(%job_id, error = %e, "Sync job could not be recorded");
        }
    }
}
