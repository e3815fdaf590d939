//! Bounded build job queue

pub mod worker;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::errors::BuildError;

/// A build job submitted through the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildJob {
    pub deployment_id: String,
    pub server_id: String,
    pub owner_id: String,
    pub branch: String,
    pub commit_hash: String,
}

/// Bounded, closable FIFO of build jobs.
///
/// `enqueue` applies back-pressure while the buffer is full and fails with
/// `QueueClosed` once the queue is closed, including callers already blocked
/// on a full buffer. Jobs accepted before `close` are still delivered;
/// `dequeue` reports closure only after the buffer has drained.
pub struct JobQueue {
    tx: mpsc::Sender<BuildJob>,
    rx: Mutex<mpsc::Receiver<BuildJob>>,
    closed: watch::Sender<bool>,
    capacity: usize,
}

impl JobQueue {
    /// Create a new job queue with the specified buffer size
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let (closed, _) = watch::channel(false);
        Self {
            tx,
            rx: Mutex::new(rx),
            closed,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Add a job to the queue, waiting for buffer space if necessary
    pub async fn enqueue(&self, job: BuildJob) -> Result<(), BuildError> {
        if self.is_closed() {
            warn!(
                deployment_id = %job.deployment_id,
                server_id = %job.server_id,
                "Failed to enqueue job: queue is closed"
            );
            return Err(BuildError::QueueClosed);
        }

        debug!(
            deployment_id = %job.deployment_id,
            server_id = %job.server_id,
            owner_id = %job.owner_id,
            "Enqueueing build job"
        );

        let mut closed = self.closed.subscribe();
        tokio::select! {
            permit = self.tx.reserve() => match permit {
                Ok(permit) => {
                    info!(
                        deployment_id = %job.deployment_id,
                        server_id = %job.server_id,
                        "Build job enqueued successfully"
                    );
                    permit.send(job);
                    Ok(())
                }
                Err(_) => Err(BuildError::QueueClosed),
            },
            _ = closed.wait_for(|c| *c) => {
                warn!(
                    deployment_id = %job.deployment_id,
                    server_id = %job.server_id,
                    "Failed to enqueue job: queue is closed"
                );
                Err(BuildError::QueueClosed)
            }
        }
    }

    /// Retrieve the next job from the queue.
    ///
    /// Returns `None` once the queue is closed and all buffered jobs have
    /// been consumed.
    pub async fn dequeue(&self) -> Option<BuildJob> {
        let mut rx = self.rx.lock().await;
        let mut closed = self.closed.subscribe();
        loop {
            // Buffered jobs drain before closure is reported
            if *closed.borrow() {
                return rx.try_recv().ok();
            }
            tokio::select! {
                biased;
                job = rx.recv() => return job,
                _ = closed.changed() => {}
            }
        }
    }

    /// Close the queue. Idempotent; pending enqueues fail and buffered jobs
    /// remain consumable.
    pub fn close(&self) {
        let was_closed = self.closed.send_replace(true);
        if !was_closed {
            info!("Job queue closed");
        }
    }
}
