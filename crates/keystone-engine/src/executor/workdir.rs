//! Per-invocation working directories.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::types::DeploymentId;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A working directory unique to one lifecycle call.
///
/// Laid out as `<base>/<deployment_id>/<nanos>-<seq>` so concurrent calls for
/// the same deployment never share files. The directory is removed by
/// [`WorkingDir::cleanup`], or on drop if cleanup never ran, and the
/// deployment directory goes with it once empty.
#[derive(Debug)]
pub struct WorkingDir {
    path: PathBuf,
    removed: bool,
}

impl WorkingDir {
    /// Reserve a fresh directory for a deployment.
    pub fn create(base: &Path, deployment_id: &DeploymentId) -> EngineResult<Self> {
        let parent = base.join(deployment_id.to_string());
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let path = parent.join(format!("{nanos}-{seq}"));

        create_leaf(&parent, &path).map_err(|e| {
            EngineError::executor_init(format!("failed to create {}: {e}", path.display()))
        })?;

        debug!(path = %path.display(), "working directory created");
        Ok(Self {
            path,
            removed: false,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a file inside the directory.
    pub async fn write(&self, name: &str, contents: impl AsRef<[u8]>) -> EngineResult<()> {
        let target = self.path.join(name);
        tokio::fs::write(&target, contents).await.map_err(|e| {
            EngineError::executor_init(format!("failed to write {}: {e}", target.display()))
        })
    }

    /// Remove the directory and everything in it. Safe to call repeatedly.
    pub async fn cleanup(&mut self) -> EngineResult<()> {
        if self.removed {
            return Ok(());
        }

        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(EngineError::internal(format!(
                    "failed to remove {}: {e}",
                    self.path.display()
                )));
            }
        }

        self.removed = true;
        debug!(path = %self.path.display(), "working directory removed");

        if let Some(parent) = self.path.parent() {
            // Fails while sibling calls still own directories here.
            if tokio::fs::remove_dir(parent).await.is_ok() {
                debug!(path = %parent.display(), "deployment directory removed");
            }
        }
        Ok(())
    }
}

/// Create `path` under `parent`. A sibling cleanup may remove an empty
/// `parent` between the two steps, so a vanished parent is recreated.
fn create_leaf(parent: &Path, path: &Path) -> std::io::Result<()> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match std::fs::create_dir_all(parent).and_then(|()| std::fs::create_dir(path)) {
            Err(e) if e.kind() == ErrorKind::NotFound && attempts < 3 => continue,
            result => return result,
        }
    }
}

impl Drop for WorkingDir {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove working directory");
                return;
            }
        }
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::remove_dir(parent);
        }
    }
}
