//! Per-deployment mutual exclusion.
//!
//! Operations on the same deployment never overlap; operations on different
//! deployments run freely. Entries are dropped from the map once the last
//! holder or waiter lets go.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use crate::types::DeploymentId;

/// Registry of per-deployment locks. Clones share the same registry.
#[derive(Debug, Clone, Default)]
pub struct DeploymentLocks {
    inner: Arc<DashMap<DeploymentId, Arc<Mutex<()>>>>,
}

impl DeploymentLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a deployment.
    pub async fn acquire(&self, id: DeploymentId) -> DeploymentGuard {
        let mutex = Arc::clone(
            self.inner
                .entry(id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );

        trace!(deployment_id = %id, "waiting for deployment lock");
        let guard = mutex.lock_owned().await;

        DeploymentGuard {
            id,
            guard: Some(guard),
            locks: Arc::clone(&self.inner),
        }
    }

    /// Number of deployments with a live lock entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Exclusive access to one deployment, released on drop.
#[derive(Debug)]
pub struct DeploymentGuard {
    id: DeploymentId,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<DeploymentId, Arc<Mutex<()>>>>,
}

impl Drop for DeploymentGuard {
    fn drop(&mut self) {
        // Release the mutex first so the map holds the only reference when
        // nobody else is waiting.
        drop(self.guard.take());
        self.locks
            .remove_if(&self.id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn entry_removed_after_release() {
        let locks = DeploymentLocks::new();
        let id = DeploymentId::generate();

        let guard = locks.acquire(id).await;
        assert_eq!(locks.len(), 1);

        drop(guard);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn same_deployment_is_serialised() {
        let locks = DeploymentLocks::new();
        let id = DeploymentId::generate();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let locks = locks.clone();
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    let _guard = locks.acquire(id).await;
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            task.await.expect("task panicked");
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn different_deployments_do_not_block() {
        let locks = DeploymentLocks::new();
        let first = locks.acquire(DeploymentId::generate()).await;

        let second = tokio::time::timeout(
            Duration::from_secs(1),
            locks.acquire(DeploymentId::generate()),
        )
        .await
        .expect("second deployment should not wait");

        assert_eq!(locks.len(), 2);
        drop(first);
        drop(second);
        assert!(locks.is_empty());
    }
}
