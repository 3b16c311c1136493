//! Deployment and state storage backends.
//!
//! Two traits are defined here. [`DeploymentStore`] is the repository the task
//! handler reads context from and writes status, logs and outputs to.
//! [`StateStore`] holds the opaque per-deployment state blob. Both backends
//! implement both traits over the same records, mirroring a single
//! `deployments` table that carries the state column.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::types::{
    DeploymentId, DeploymentRecord, DeploymentStatus, GraphId, GraphRecord, LogEntry, Outputs,
    Project, ProjectId, StateBlob, StoredState,
};

/// Repository for deployments and the project and graph they reference.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Insert a project.
    async fn insert_project(&self, project: &Project) -> EngineResult<()>;

    /// Insert a graph version.
    async fn insert_graph(&self, graph: &GraphRecord) -> EngineResult<()>;

    /// Insert a new deployment record.
    ///
    /// Returns an error if a deployment with the same ID already exists.
    async fn insert_deployment(&self, record: &DeploymentRecord) -> EngineResult<()>;

    /// Get a deployment by ID.
    async fn get_deployment(&self, id: &DeploymentId) -> EngineResult<Option<DeploymentRecord>>;

    /// Get a project by ID.
    async fn get_project(&self, id: &ProjectId) -> EngineResult<Option<Project>>;

    /// Get a graph version by ID.
    async fn get_graph(&self, id: &GraphId) -> EngineResult<Option<GraphRecord>>;

    /// Update a deployment's status and error message.
    async fn update_status(
        &self,
        id: &DeploymentId,
        status: DeploymentStatus,
        error: Option<&str>,
    ) -> EngineResult<()>;

    /// Replace a deployment's outputs.
    async fn save_outputs(&self, id: &DeploymentId, outputs: &Outputs) -> EngineResult<()>;

    /// Append an entry to a deployment's log.
    async fn append_log(&self, id: &DeploymentId, entry: &LogEntry) -> EngineResult<()>;
}

/// Persistence for the opaque provisioning-tool state.
///
/// Writes are last-write-wins and bump a per-deployment version. Callers are
/// expected to serialize access per deployment; the lock hooks exist for a
/// distributed implementation and do nothing here.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Save a blob, or clear the stored state with `None`.
    async fn save_state(&self, id: &DeploymentId, state: Option<&StateBlob>) -> EngineResult<()>;

    /// Load what is stored, distinguishing cleared from never applied.
    async fn load_state(&self, id: &DeploymentId) -> EngineResult<StoredState>;

    /// Load the stored blob, if any.
    async fn get_state(&self, id: &DeploymentId) -> EngineResult<Option<StateBlob>> {
        Ok(self.load_state(id).await?.blob().cloned())
    }

    /// Reserved.
    async fn lock_state(&self, _id: &DeploymentId) -> EngineResult<()> {
        Ok(())
    }

    /// Reserved.
    async fn unlock_state(&self, _id: &DeploymentId) -> EngineResult<()> {
        Ok(())
    }
}
