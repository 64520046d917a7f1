use super::queue::DispatchQueue;
use crate::runtime::FlowRuntime;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Fixed set of tasks draining the dispatch queue. Bounds how many runs
/// execute at once no matter how bursty submissions are.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn spawn(size: usize, runtime: Arc<FlowRuntime>, queue: Arc<DispatchQueue>) -> Self {
        let shutdown = CancellationToken::new();
        let workers = (0..size.max(1))
            .map(|worker_id| {
                let runtime = Arc::clone(&runtime);
                let queue = Arc::clone(&queue);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    tracing::debug!(worker_id, "dispatch worker started");
                    while let Some(job) = queue.next(&shutdown).await {
                        let run_id = job.run_id;
                        tracing::info!(worker_id, run_id = %run_id, workflow_id = %job.workflow_id, "worker picked up run");
                        if let Err(e) = runtime.run_job(job).await {
                            tracing::error!(worker_id, run_id = %run_id, error = %e, "queued run could not start");
                        }
                        queue.ack(run_id).await;
                    }
                    tracing::debug!(worker_id, "dispatch worker stopped");
                })
            })
            .collect();

        Self { workers, shutdown }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Stop taking new jobs and wait for runs in progress to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "dispatch worker panicked");
            }
        }
    }
}
