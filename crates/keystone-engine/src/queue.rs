//! In-process job queue feeding the worker pool.
//!
//! The transport that delivers jobs into the process (retries, backoff,
//! persistence) lives outside the engine. This queue only bounds how much
//! work is buffered and wakes idle workers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::job::Job;

/// Bounded FIFO of pending jobs.
#[derive(Debug)]
pub struct JobQueue {
    pending: Mutex<VecDeque<Job>>,
    max_size: usize,
    notify: Notify,
    closed: AtomicBool,
}

impl JobQueue {
    /// Create a queue holding at most `max_size` pending jobs.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            max_size,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Add a job to the back of the queue.
    pub async fn submit(&self, job: Job) -> EngineResult<()> {
        if self.is_closed() {
            return Err(EngineError::internal("job queue is closed"));
        }

        {
            let mut pending = self.pending.lock().await;
            if pending.len() >= self.max_size {
                return Err(EngineError::QueueFull);
            }
            debug!(kind = %job.kind, "job queued");
            pending.push_back(job);
        }

        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the next job.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn next(&self) -> Option<Job> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(job) = self.pending.lock().await.pop_front() {
                return Some(job);
            }
            if self.is_closed() {
                return None;
            }

            notified.await;
        }
    }

    /// Take the next job without waiting.
    pub async fn try_next(&self) -> Option<Job> {
        self.pending.lock().await.pop_front()
    }

    /// Number of pending jobs.
    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }

    /// Stop accepting jobs and wake every waiting worker.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("job queue closed");
        }
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
