//! Fixed-size pool of Tokio tasks draining the job queue.

use crate::dispatch::QueuedJob;
use crate::executor::ConversionExecutor;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Workers share one receiver; each pulls the next job when it is free.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` tasks (at least one) on the current runtime.
    pub fn spawn(
        workers: usize,
        queue: mpsc::UnboundedReceiver<QueuedJob>,
        executor: Arc<ConversionExecutor>,
    ) -> Self {
        let queue = Arc::new(Mutex::new(queue));
        let handles = (0..workers.max(1))
            .map(|n| {
                let queue = Arc::clone(&queue);
                let executor = Arc::clone(&executor);
                tokio::spawn(async move {
                    debug!("Worker {} started", n);
                    loop {
                        // Only the lock holder waits on the channel; the
                        // guard drops before the job runs.
                        let next = queue.lock().await.recv().await;
                        match next {
                            Some(job) => executor.execute(job).await,
                            None => break,
                        }
                    }
                    debug!("Worker {} stopped: queue closed", n);
                })
            })
            .collect();
        info!("Worker pool started with {} workers", workers.max(1));
        Self { handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to drain the queue and exit. The queue's sender
    /// side must be dropped first.
    pub async fn join(self) {
        for result in futures::future::join_all(self.handles).await {
            if let Err(e) = result {
                error!("Worker task ended abnormally: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.handles.len())
            .finish()
    }
}
