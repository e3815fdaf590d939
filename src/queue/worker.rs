//! Worker pool draining the job queue

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::errors::BuildError;
use crate::queue::{BuildJob, JobQueue};

/// Fixed set of workers bound to a single job queue.
///
/// A handler error aborts only that build; the worker keeps pulling jobs.
/// A panicking handler terminates its own worker and is reported as lost
/// capacity by `wait`.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `worker_count` workers processing jobs with the given handler
    pub fn start<F, Fut>(queue: Arc<JobQueue>, worker_count: usize, handler: F) -> Self
    where
        F: Fn(BuildJob) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<(), BuildError>> + Send + 'static,
    {
        let mut handles = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let queue = queue.clone();
            let handler = handler.clone();
            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, queue, handler).await;
            }));
        }

        info!(worker_count, "Worker pool started");
        Self { handles }
    }

    /// Wait for every worker to exit. Returns the number of workers lost to
    /// panicking handlers.
    pub async fn wait(self) -> usize {
        let mut lost = 0;
        for handle in self.handles {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    lost += 1;
                    error!("Worker terminated by panic: {}", e);
                }
            }
        }

        if lost > 0 {
            error!(lost, "Worker pool exited with degraded capacity");
        }
        lost
    }
}

async fn worker_loop<F, Fut>(worker_id: usize, queue: Arc<JobQueue>, handler: F)
where
    F: Fn(BuildJob) -> Fut,
    Fut: Future<Output = Result<(), BuildError>>,
{
    while let Some(job) = queue.dequeue().await {
        info!(
            worker_id,
            deployment_id = %job.deployment_id,
            server_id = %job.server_id,
            owner_id = %job.owner_id,
            "Worker processing build job"
        );

        let deployment_id = job.deployment_id.clone();
        let server_id = job.server_id.clone();
        match handler(job).await {
            Ok(()) => {
                info!(
                    worker_id,
                    deployment_id = %deployment_id,
                    server_id = %server_id,
                    "Worker completed build job successfully"
                );
            }
            Err(e) => {
                error!(
                    worker_id,
                    deployment_id = %deployment_id,
                    server_id = %server_id,
                    error = %e,
                    "Worker failed to process build job"
                );
            }
        }
    }

    debug!(worker_id, "Worker exiting: queue closed and drained");
}
