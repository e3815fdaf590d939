//! Build server wiring and run loop

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::app::options::AppOptions;
use crate::errors::BuildError;
use crate::pipeline::{Pipeline, PipelineDeps};
use crate::queue::worker::WorkerPool;
use crate::queue::{BuildJob, JobQueue};

/// Running build server: a queue, a worker pool, and the pipeline between
/// them.
///
/// Submitters enqueue jobs; workers execute them asynchronously. Shutdown
/// closes the queue, drains accepted work, and cancels builds that outlive
/// the drain deadline.
pub struct BuildServer {
    queue: Arc<JobQueue>,
    pool: WorkerPool,
    cancel: CancellationToken,
    max_shutdown_delay: Duration,
}

impl BuildServer {
    /// Wire the queue, worker pool and pipeline, and start the workers
    pub fn start(options: &AppOptions, deps: PipelineDeps) -> Self {
        let queue = Arc::new(JobQueue::new(options.queue_capacity));
        let cancel = CancellationToken::new();
        let pipeline = Arc::new(Pipeline::new(deps, options.pipeline.clone()));

        let handler_cancel = cancel.clone();
        let pool = WorkerPool::start(queue.clone(), options.worker_count, move |job| {
            let pipeline = pipeline.clone();
            let cancel = handler_cancel.clone();
            async move { pipeline.execute(&job, &cancel).await }
        });

        info!(
            worker_count = options.worker_count,
            queue_capacity = options.queue_capacity,
            "Build server started"
        );

        Self {
            queue,
            pool,
            cancel,
            max_shutdown_delay: options.lifecycle.max_shutdown_delay,
        }
    }

    /// Submit a build job; blocks while the queue is full
    pub async fn enqueue(&self, job: BuildJob) -> Result<(), BuildError> {
        self.queue.enqueue(job).await
    }

    /// Shared handle to the underlying queue
    pub fn queue(&self) -> Arc<JobQueue> {
        self.queue.clone()
    }

    /// Close the queue, drain accepted jobs, and join the workers
    pub async fn shutdown(self) -> Result<(), BuildError> {
        info!("Shutting down build server...");
        self.queue.close();

        let drain = self.pool.wait();
        tokio::pin!(drain);
        let deadline = tokio::time::sleep(self.max_shutdown_delay);
        tokio::pin!(deadline);

        let mut cancelled = false;
        let lost = loop {
            tokio::select! {
                lost = &mut drain => break lost,
                _ = &mut deadline, if !cancelled => {
                    warn!(
                        "Graceful drain exceeded {:?}, cancelling in-flight builds...",
                        self.max_shutdown_delay
                    );
                    self.cancel.cancel();
                    cancelled = true;
                }
            }
        };

        if lost > 0 {
            error!(lost, "Build server shut down with degraded worker capacity");
        }
        info!("Shutdown complete");
        Ok(())
    }
}

/// Run the build server until the shutdown signal resolves
pub async fn run(
    options: AppOptions,
    deps: PipelineDeps,
    shutdown_signal: impl Future<Output = ()> + Send,
) -> Result<(), BuildError> {
    let server = BuildServer::start(&options, deps);

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");
    server.shutdown().await
}
