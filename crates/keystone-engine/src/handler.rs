//! Deployment job handling.
//!
//! The handler turns a delivered [`Job`] into a run of the deployment state
//! machine: it loads context from the [`DeploymentStore`], drives the
//! [`Provisioner`], and writes status, logs and outputs back as the run
//! progresses. Tool state is persisted by the provisioner alone, under its
//! per-deployment lock.

use std::sync::Arc;

use serde_json::{json, Map};
use tracing::{error, info, instrument, warn};

use crate::error::{EngineError, EngineResult};
use crate::job::{Job, JobKind};
use crate::orchestrator::Provisioner;
use crate::state::{AnyDeployment, Deployment, DeploymentState};
use crate::store::DeploymentStore;
use crate::types::{DeploymentData, DeploymentId, DeploymentRecord, InfraConfig, LogEntry};

/// Consumes deployment jobs.
#[derive(Clone)]
pub struct TaskHandler {
    store: Arc<dyn DeploymentStore>,
    provisioner: Arc<dyn Provisioner>,
}

impl TaskHandler {
    #[must_use]
    pub fn new(store: Arc<dyn DeploymentStore>, provisioner: Arc<dyn Provisioner>) -> Self {
        Self { store, provisioner }
    }

    /// Handle one job.
    pub async fn handle(&self, job: &Job) -> EngineResult<()> {
        let deployment_id = job.deployment_id()?;
        match job.kind {
            JobKind::Provision => self.handle_provision(&deployment_id).await,
            JobKind::Destroy => self.handle_destroy(&deployment_id).await,
        }
    }

    /// Provision a deployment: `planning`, `applying`, then `applied` or
    /// `failed`.
    #[instrument(skip(self), fields(deployment_id = %deployment_id))]
    pub async fn handle_provision(&self, deployment_id: &DeploymentId) -> EngineResult<()> {
        let record = self.load(deployment_id).await?;
        let planning = AnyDeployment::from_persisted(record.data, record.status)
            .rearm()
            .start_planning();
        self.persist_status(&planning).await;

        let config = match self.infra_config(planning.data()).await {
            Ok(config) => config,
            Err(e) => {
                let message = format!("provision error: {e}");
                error!(error = %e, "failed to load deployment context");
                self.append_log(deployment_id, LogEntry::error(&message)).await;
                self.persist_status(&planning.fail(message)).await;
                return Err(e);
            }
        };

        let applying = planning.start_applying();
        self.persist_status(&applying).await;

        match self.provisioner.apply(&config).await {
            Ok(result) => {
                if let Err(e) = self.store.save_outputs(deployment_id, &result.outputs).await {
                    warn!(error = %e, "failed to save outputs");
                }

                self.append_log(
                    deployment_id,
                    LogEntry::info("apply completed")
                        .with_data(json!({ "outputs": result.outputs.len() })),
                )
                .await;

                let applied = applying.complete(result.outputs, result.state);
                self.persist_status(&applied).await;
                info!("deployment applied");
                Ok(())
            }
            Err(failure) => {
                let message = format!("apply error: {}", failure.error);
                error!(error = %failure.error, "apply failed");
                self.append_log(deployment_id, LogEntry::error(&message)).await;
                self.persist_status(&applying.fail(message)).await;
                Err(failure.into_error())
            }
        }
    }

    /// Destroy a deployment: `destroying`, then `destroyed` or `failed`.
    #[instrument(skip(self), fields(deployment_id = %deployment_id))]
    pub async fn handle_destroy(&self, deployment_id: &DeploymentId) -> EngineResult<()> {
        let record = self.load(deployment_id).await?;
        let destroying = AnyDeployment::from_persisted(record.data, record.status)
            .rearm()
            .start_destroying();
        self.persist_status(&destroying).await;

        let state = destroying.state_blob().cloned();
        match self.provisioner.destroy(deployment_id, state).await {
            Ok(_) => {
                self.append_log(deployment_id, LogEntry::info("destroy completed"))
                    .await;

                let destroyed = destroying.complete();
                self.persist_status(&destroyed).await;
                info!("deployment destroyed");
                Ok(())
            }
            Err(failure) => {
                let message = format!("destroy error: {}", failure.error);
                error!(error = %failure.error, "destroy failed");
                self.append_log(deployment_id, LogEntry::error(&message)).await;
                self.persist_status(&destroying.fail(message)).await;
                Err(failure.into_error())
            }
        }
    }

    /// Force a non-terminal deployment into `failed`.
    ///
    /// Only the recorded status changes; a tool process already running for
    /// the deployment runs to completion.
    #[instrument(skip(self), fields(deployment_id = %deployment_id))]
    pub async fn cancel(&self, deployment_id: &DeploymentId) -> EngineResult<()> {
        let record = self.load(deployment_id).await?;
        let from = record.status;
        let failed = AnyDeployment::from_persisted(record.data, record.status).cancel("cancelled")?;

        self.store
            .update_status(deployment_id, failed.status(), failed.data().error.as_deref())
            .await?;
        self.store
            .append_log(
                deployment_id,
                &LogEntry::warn("deployment cancelled").with_data(json!({ "from": from.as_str() })),
            )
            .await?;

        info!(%from, "deployment cancelled");
        Ok(())
    }

    async fn load(&self, deployment_id: &DeploymentId) -> EngineResult<DeploymentRecord> {
        self.store
            .get_deployment(deployment_id)
            .await?
            .ok_or_else(|| EngineError::not_found("deployment", deployment_id))
    }

    async fn infra_config(&self, data: &DeploymentData) -> EngineResult<InfraConfig> {
        let project = self
            .store
            .get_project(&data.project_id)
            .await?
            .ok_or_else(|| EngineError::not_found("project", data.project_id))?;
        let graph = self
            .store
            .get_graph(&data.graph_id)
            .await?
            .ok_or_else(|| EngineError::not_found("graph", data.graph_id))?;

        Ok(InfraConfig {
            deployment_id: data.id,
            project_id: data.project_id,
            graph_id: data.graph_id,
            graph: graph.decode()?,
            cloud: project.cloud_config(),
            variables: Map::new(),
        })
    }

    async fn persist_status<S: DeploymentState>(&self, deployment: &Deployment<S>) {
        let data = deployment.data();
        if let Err(e) = self
            .store
            .update_status(&data.id, deployment.status(), data.error.as_deref())
            .await
        {
            warn!(status = %deployment.status(), error = %e, "failed to update status");
        }
    }

    async fn append_log(&self, deployment_id: &DeploymentId, entry: LogEntry) {
        if let Err(e) = self.store.append_log(deployment_id, &entry).await {
            warn!(error = %e, "failed to append log");
        }
    }
}

impl std::fmt::Debug for TaskHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandler").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use keystone_compiler::{Node, ResourceGraph};
    use serde_json::json;

    use super::*;
    use crate::executor::PlanResult;
    use crate::orchestrator::{ProvisionFailure, ProvisionResult};
    use crate::store::{MemoryStore, StateStore};
    use crate::types::{
        DeploymentStatus, GraphRecord, LogLevel, Outputs, Project, StateBlob, StoredState,
    };

    /// Provisioner that succeeds or fails without touching any tool. Like the
    /// orchestrator, it owns the state writes.
    struct StubProvisioner {
        states: Arc<MemoryStore>,
        fail_with: Option<String>,
        destroyed_after_apply: bool,
        destroyed_with: Mutex<Vec<Option<StateBlob>>>,
    }

    impl StubProvisioner {
        fn new(states: &Arc<MemoryStore>) -> Self {
            Self {
                states: Arc::clone(states),
                fail_with: None,
                destroyed_after_apply: false,
                destroyed_with: Mutex::new(Vec::new()),
            }
        }

        fn failing(mut self, message: &str) -> Self {
            self.fail_with = Some(message.to_owned());
            self
        }

        /// Clear the state once apply has stored it, as a destroy that takes
        /// the lock straight after apply releases it would.
        fn destroyed_after_apply(mut self) -> Self {
            self.destroyed_after_apply = true;
            self
        }
    }

    #[async_trait]
    impl Provisioner for StubProvisioner {
        async fn plan(&self, _config: &InfraConfig) -> EngineResult<PlanResult> {
            Ok(PlanResult {
                has_changes: true,
                plan_output: None,
            })
        }

        async fn apply(&self, config: &InfraConfig) -> Result<ProvisionResult, ProvisionFailure> {
            if let Some(message) = &self.fail_with {
                return Err(ProvisionFailure::new(EngineError::internal(message.clone())));
            }
            let outputs: Outputs = config
                .graph
                .nodes
                .iter()
                .map(|n| (format!("{}_id", n.id), json!(format!("id-{}", n.id))))
                .collect();
            let state = StateBlob::new("applied");
            self.states
                .save_state(&config.deployment_id, Some(&state))
                .await
                .map_err(ProvisionFailure::new)?;
            if self.destroyed_after_apply {
                self.states
                    .save_state(&config.deployment_id, None)
                    .await
                    .map_err(ProvisionFailure::new)?;
            }
            Ok(ProvisionResult::succeeded(outputs, Some(state)))
        }

        async fn destroy(
            &self,
            deployment_id: &DeploymentId,
            state: Option<StateBlob>,
        ) -> Result<ProvisionResult, ProvisionFailure> {
            self.destroyed_with.lock().expect("lock").push(state);
            if let Some(message) = &self.fail_with {
                return Err(ProvisionFailure::new(EngineError::internal(message.clone())));
            }
            self.states
                .save_state(deployment_id, None)
                .await
                .map_err(ProvisionFailure::new)?;
            Ok(ProvisionResult::succeeded(Outputs::new(), None))
        }

        async fn get_state(&self, deployment_id: &DeploymentId) -> EngineResult<Option<StateBlob>> {
            self.states.get_state(deployment_id).await
        }
    }

    async fn seed(store: &MemoryStore) -> DeploymentId {
        let project = Project::new("demo", "aws", json!({"region": "eu-west-1"}));
        store.insert_project(&project).await.expect("project");

        let graph = ResourceGraph::new(
            vec![Node::new("assets", "aws_s3_bucket").with_property("bucket_name", "assets")],
            Vec::new(),
        );
        let graph = GraphRecord::from_graph(project.id, 1, &graph).expect("graph");
        store.insert_graph(&graph).await.expect("graph");

        let record = DeploymentRecord::new(DeploymentData::new(project.id, graph.id));
        store.insert_deployment(&record).await.expect("deployment");
        record.data.id
    }

    fn handler(store: &Arc<MemoryStore>, provisioner: StubProvisioner) -> TaskHandler {
        TaskHandler::new(store.clone(), Arc::new(provisioner))
    }

    async fn record(store: &MemoryStore, id: &DeploymentId) -> DeploymentRecord {
        store
            .get_deployment(id)
            .await
            .expect("get")
            .expect("deployment exists")
    }

    #[tokio::test]
    async fn provision_success_records_outputs_and_state() {
        let store = Arc::new(MemoryStore::new());
        let id = seed(&store).await;

        handler(&store, StubProvisioner::new(&store))
            .handle(&Job::provision(id))
            .await
            .expect("provision");

        let record = record(&store, &id).await;
        assert_eq!(record.status, DeploymentStatus::Applied);
        assert_eq!(record.data.outputs["assets_id"], "id-assets");
        assert_eq!(
            record.data.terraform_state.blob(),
            Some(&StateBlob::new("applied"))
        );
        assert_eq!(record.data.logs.last().map(|l| l.message.as_str()), Some("apply completed"));
        assert!(record.data.error.is_none());
    }

    #[tokio::test]
    async fn provision_does_not_restore_state_cleared_after_apply() {
        let store = Arc::new(MemoryStore::new());
        let id = seed(&store).await;

        handler(&store, StubProvisioner::new(&store).destroyed_after_apply())
            .handle_provision(&id)
            .await
            .expect("provision");

        let record = record(&store, &id).await;
        assert_eq!(record.status, DeploymentStatus::Applied);
        assert_eq!(record.data.terraform_state, StoredState::Cleared { version: 2 });
        assert_eq!(store.get_state(&id).await.expect("state"), None);
    }

    #[tokio::test]
    async fn provision_failure_logs_and_fails() {
        let store = Arc::new(MemoryStore::new());
        let id = seed(&store).await;
        let provisioner = StubProvisioner::new(&store).failing("boom");

        let err = handler(&store, provisioner)
            .handle_provision(&id)
            .await
            .expect_err("should fail");
        assert_eq!(err.to_string(), "internal error: boom");

        let record = record(&store, &id).await;
        assert_eq!(record.status, DeploymentStatus::Failed);
        let errors: Vec<_> = record
            .data
            .logs
            .iter()
            .filter(|l| l.level == LogLevel::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "apply error: internal error: boom");
        assert_eq!(record.data.error.as_deref(), Some("apply error: internal error: boom"));
    }

    #[tokio::test]
    async fn missing_graph_fails_before_provisioning() {
        let store = Arc::new(MemoryStore::new());
        let project = Project::new("demo", "aws", json!({}));
        store.insert_project(&project).await.expect("project");
        let record = DeploymentRecord::new(DeploymentData::new(
            project.id,
            crate::types::GraphId::generate(),
        ));
        store.insert_deployment(&record).await.expect("deployment");
        let id = record.data.id;

        let err = handler(&store, StubProvisioner::new(&store))
            .handle_provision(&id)
            .await
            .expect_err("should fail");
        assert!(matches!(err, EngineError::NotFound { entity: "graph", .. }));

        let stored = self::record(&store, &id).await;
        assert_eq!(stored.status, DeploymentStatus::Failed);
        assert!(stored.data.logs[0].message.starts_with("provision error: graph not found"));
    }

    #[tokio::test]
    async fn destroy_passes_stored_state_and_clears_it() {
        let store = Arc::new(MemoryStore::new());
        let id = seed(&store).await;
        store
            .save_state(&id, Some(&StateBlob::new("prior")))
            .await
            .expect("save");

        let provisioner = Arc::new(StubProvisioner::new(&store));
        let handler = TaskHandler::new(store.clone(), provisioner.clone());
        handler.handle(&Job::destroy(id)).await.expect("destroy");

        assert_eq!(
            *provisioner.destroyed_with.lock().expect("lock"),
            vec![Some(StateBlob::new("prior"))]
        );
        let record = record(&store, &id).await;
        assert_eq!(record.status, DeploymentStatus::Destroyed);
        assert!(matches!(record.data.terraform_state, StoredState::Cleared { .. }));
        assert_eq!(record.data.logs.last().map(|l| l.message.as_str()), Some("destroy completed"));
    }

    #[tokio::test]
    async fn destroy_failure_keeps_state() {
        let store = Arc::new(MemoryStore::new());
        let id = seed(&store).await;
        store
            .save_state(&id, Some(&StateBlob::new("prior")))
            .await
            .expect("save");
        let provisioner = StubProvisioner::new(&store).failing("locked");

        handler(&store, provisioner)
            .handle_destroy(&id)
            .await
            .expect_err("should fail");

        let record = record(&store, &id).await;
        assert_eq!(record.status, DeploymentStatus::Failed);
        assert_eq!(record.data.terraform_state.blob(), Some(&StateBlob::new("prior")));
        assert_eq!(
            record.data.logs.last().map(|l| l.message.as_str()),
            Some("destroy error: internal error: locked")
        );
    }

    #[tokio::test]
    async fn cancel_non_terminal_and_reject_terminal() {
        let store = Arc::new(MemoryStore::new());
        let id = seed(&store).await;
        let handler = handler(&store, StubProvisioner::new(&store));

        store
            .update_status(&id, DeploymentStatus::Applying, None)
            .await
            .expect("status");
        handler.cancel(&id).await.expect("cancel");

        let stored = record(&store, &id).await;
        assert_eq!(stored.status, DeploymentStatus::Failed);
        assert_eq!(stored.data.error.as_deref(), Some("cancelled"));
        assert_eq!(stored.data.logs[0].level, LogLevel::Warn);

        let err = handler.cancel(&id).await.expect_err("terminal");
        assert!(matches!(
            err,
            EngineError::InvalidStateTransition {
                from: "failed",
                to: "failed"
            }
        ));
    }

    #[tokio::test]
    async fn malformed_payload_is_rejected_without_writes() {
        let store = Arc::new(MemoryStore::new());
        let id = seed(&store).await;
        let job = Job {
            kind: JobKind::Provision,
            payload: json!({"deployment_id": "not-a-uuid"}),
        };

        let err = handler(&store, StubProvisioner::new(&store))
            .handle(&job)
            .await
            .expect_err("should fail");
        assert!(err.is_permanent());
        assert_eq!(record(&store, &id).await.status, DeploymentStatus::Pending);
    }

    #[tokio::test]
    async fn unknown_deployment_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let err = handler(&store, StubProvisioner::new(&store))
            .handle(&Job::provision(DeploymentId::generate()))
            .await
            .expect_err("should fail");
        assert!(matches!(err, EngineError::NotFound { entity: "deployment", .. }));
    }
}
