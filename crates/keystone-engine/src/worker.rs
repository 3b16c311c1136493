//! Job worker.
//!
//! Pulls jobs from the [`JobQueue`] and hands them to the [`TaskHandler`].
//! A job holds its worker for the whole external process run.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::handler::TaskHandler;
use crate::job::Job;
use crate::queue::JobQueue;

/// A worker processing jobs from the queue.
#[derive(Debug)]
pub struct Worker {
    id: usize,
    queue: Arc<JobQueue>,
    handler: TaskHandler,
}

impl Worker {
    #[must_use]
    pub const fn new(id: usize, queue: Arc<JobQueue>, handler: TaskHandler) -> Self {
        Self { id, queue, handler }
    }

    /// Run until cancelled or the queue is closed and drained.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(worker_id = self.id, "worker started");

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    info!(worker_id = self.id, "worker shutting down");
                    break;
                }

                result = self.queue.next() => {
                    match result {
                        Some(job) => self.process(&job).await,
                        None => {
                            info!(worker_id = self.id, "queue closed");
                            break;
                        }
                    }
                }
            }
        }

        info!(worker_id = self.id, "worker stopped");
    }

    async fn process(&self, job: &Job) {
        info!(worker_id = self.id, kind = %job.kind, "processing job");

        match self.handler.handle(job).await {
            Ok(()) => info!(worker_id = self.id, kind = %job.kind, "job completed"),
            Err(e) if e.is_permanent() => {
                warn!(worker_id = self.id, kind = %job.kind, error = %e, "job rejected");
            }
            Err(e) => error!(worker_id = self.id, kind = %job.kind, error = %e, "job failed"),
        }
    }
}

/// Spawn `count` workers sharing one queue and handler.
pub fn spawn_workers(
    count: usize,
    queue: &Arc<JobQueue>,
    handler: &TaskHandler,
    cancel: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|id| {
            let worker = Worker::new(id, Arc::clone(queue), handler.clone());
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.run(cancel).await })
        })
        .collect()
}
