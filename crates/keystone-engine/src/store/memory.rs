//! In-memory store for tests and single-process use.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{EngineError, EngineResult};
use crate::types::{
    DeploymentId, DeploymentRecord, DeploymentStatus, GraphId, GraphRecord, LogEntry, Outputs,
    Project, ProjectId, StateBlob, StoredState,
};

use super::{DeploymentStore, StateStore};

/// In-memory deployment and state store.
///
/// Data is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    deployments: RwLock<HashMap<DeploymentId, DeploymentRecord>>,
    projects: RwLock<HashMap<ProjectId, Project>>,
    graphs: RwLock<HashMap<GraphId, GraphRecord>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_deployment<T>(
        &self,
        id: &DeploymentId,
        f: impl FnOnce(&mut DeploymentRecord) -> T,
    ) -> EngineResult<T> {
        let mut deployments = self
            .deployments
            .write()
            .map_err(|_| EngineError::internal("lock poisoned"))?;

        let record = deployments
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found("deployment", id))?;

        let result = f(record);
        record.data.updated_at = chrono::Utc::now();
        Ok(result)
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn insert_project(&self, project: &Project) -> EngineResult<()> {
        let mut projects = self
            .projects
            .write()
            .map_err(|_| EngineError::internal("lock poisoned"))?;
        projects.insert(project.id, project.clone());
        Ok(())
    }

    async fn insert_graph(&self, graph: &GraphRecord) -> EngineResult<()> {
        let mut graphs = self
            .graphs
            .write()
            .map_err(|_| EngineError::internal("lock poisoned"))?;
        graphs.insert(graph.id, graph.clone());
        Ok(())
    }

    async fn insert_deployment(&self, record: &DeploymentRecord) -> EngineResult<()> {
        let mut deployments = self
            .deployments
            .write()
            .map_err(|_| EngineError::internal("lock poisoned"))?;

        if deployments.contains_key(&record.data.id) {
            return Err(EngineError::internal(format!(
                "deployment {} already exists",
                record.data.id
            )));
        }

        deployments.insert(record.data.id, record.clone());
        Ok(())
    }

    async fn get_deployment(&self, id: &DeploymentId) -> EngineResult<Option<DeploymentRecord>> {
        let deployments = self
            .deployments
            .read()
            .map_err(|_| EngineError::internal("lock poisoned"))?;
        Ok(deployments.get(id).cloned())
    }

    async fn get_project(&self, id: &ProjectId) -> EngineResult<Option<Project>> {
        let projects = self
            .projects
            .read()
            .map_err(|_| EngineError::internal("lock poisoned"))?;
        Ok(projects.get(id).cloned())
    }

    async fn get_graph(&self, id: &GraphId) -> EngineResult<Option<GraphRecord>> {
        let graphs = self
            .graphs
            .read()
            .map_err(|_| EngineError::internal("lock poisoned"))?;
        Ok(graphs.get(id).cloned())
    }

    async fn update_status(
        &self,
        id: &DeploymentId,
        status: DeploymentStatus,
        error: Option<&str>,
    ) -> EngineResult<()> {
        self.with_deployment(id, |record| {
            record.status = status;
            record.data.error = error.map(ToOwned::to_owned);
        })
    }

    async fn save_outputs(&self, id: &DeploymentId, outputs: &Outputs) -> EngineResult<()> {
        self.with_deployment(id, |record| record.data.outputs = outputs.clone())
    }

    async fn append_log(&self, id: &DeploymentId, entry: &LogEntry) -> EngineResult<()> {
        self.with_deployment(id, |record| record.data.logs.push(entry.clone()))
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn save_state(&self, id: &DeploymentId, state: Option<&StateBlob>) -> EngineResult<()> {
        self.with_deployment(id, |record| {
            record.data.terraform_state = record.data.terraform_state.next(state.cloned());
        })
        .map_err(|e| EngineError::state_store(format!("save state: {e}")))
    }

    async fn load_state(&self, id: &DeploymentId) -> EngineResult<StoredState> {
        let deployments = self
            .deployments
            .read()
            .map_err(|_| EngineError::internal("lock poisoned"))?;
        deployments
            .get(id)
            .map(|record| record.data.terraform_state.clone())
            .ok_or_else(|| EngineError::state_store(format!("load state: deployment not found: {id}")))
    }
}
