//! Provisioning orchestration.
//!
//! The orchestrator composes the graph compiler, a per-call [`Executor`] and
//! the [`StateStore`] into the plan, apply and destroy lifecycle calls. Every
//! call for a deployment holds that deployment's lock for its full duration
//! and removes its working directory before returning.

use std::sync::Arc;

use async_trait::async_trait;
use keystone_compiler::{CompiledCode, GraphCompiler};
use serde_json::Map;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::error::{EngineError, EngineResult};
use crate::executor::{ApplyResult, Executor, ExecutorConfig, PlanResult};
use crate::locks::DeploymentLocks;
use crate::store::StateStore;
use crate::types::{DeploymentId, InfraConfig, Outputs, StateBlob};

/// Outcome of an apply or destroy.
#[derive(Debug, Clone, Default)]
pub struct ProvisionResult {
    pub success: bool,
    pub outputs: Outputs,
    pub state: Option<StateBlob>,
    pub error_message: Option<String>,
}

impl ProvisionResult {
    #[must_use]
    pub const fn succeeded(outputs: Outputs, state: Option<StateBlob>) -> Self {
        Self {
            success: true,
            outputs,
            state,
            error_message: None,
        }
    }

    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            outputs: Outputs::new(),
            state: None,
            error_message: Some(message.into()),
        }
    }
}

/// A failed apply or destroy: the unsuccessful result and its cause.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct ProvisionFailure {
    pub result: ProvisionResult,
    #[source]
    pub error: EngineError,
}

impl ProvisionFailure {
    #[must_use]
    pub fn new(error: EngineError) -> Self {
        Self {
            result: ProvisionResult::failed(error.to_string()),
            error,
        }
    }

    #[must_use]
    pub fn into_error(self) -> EngineError {
        self.error
    }
}

/// Lifecycle operations against real infrastructure.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Compute what an apply would change.
    async fn plan(&self, config: &InfraConfig) -> EngineResult<PlanResult>;

    /// Converge infrastructure to the graph, persisting the resulting state.
    async fn apply(&self, config: &InfraConfig) -> Result<ProvisionResult, ProvisionFailure>;

    /// Tear down a deployment's infrastructure. Without a state argument the
    /// stored state is used. Stored state is cleared on success.
    async fn destroy(
        &self,
        deployment_id: &DeploymentId,
        state: Option<StateBlob>,
    ) -> Result<ProvisionResult, ProvisionFailure>;

    /// The stored state, if any.
    async fn get_state(&self, deployment_id: &DeploymentId) -> EngineResult<Option<StateBlob>>;
}

/// Drives the external provisioning tool for compiled graphs.
pub struct ProvisioningOrchestrator {
    compiler: GraphCompiler,
    executor: ExecutorConfig,
    states: Arc<dyn StateStore>,
    locks: DeploymentLocks,
    cancel: CancellationToken,
}

impl ProvisioningOrchestrator {
    #[must_use]
    pub fn new(executor: ExecutorConfig, states: Arc<dyn StateStore>) -> Self {
        Self {
            compiler: GraphCompiler::new(),
            executor,
            states,
            locks: DeploymentLocks::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Kill in-flight tool processes when `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub const fn locks(&self) -> &DeploymentLocks {
        &self.locks
    }

    fn executor(&self, deployment_id: &DeploymentId) -> EngineResult<Executor> {
        Executor::create(&self.executor, deployment_id, self.cancel.child_token())
    }

    async fn plan_locked(&self, config: &InfraConfig) -> EngineResult<PlanResult> {
        let code = self.compiler.compile(&config.graph, &config.cloud)?;
        let mut executor = self.executor(&config.deployment_id)?;

        let result = async {
            executor.initialize(&code, &config.variables).await?;
            executor.plan().await
        }
        .await;

        finish(executor, result).await
    }

    async fn apply_locked(&self, config: &InfraConfig) -> EngineResult<ApplyResult> {
        let code = self.compiler.compile(&config.graph, &config.cloud)?;
        let mut executor = self.executor(&config.deployment_id)?;

        let result = async {
            executor.initialize(&code, &config.variables).await?;
            executor.apply().await
        }
        .await;

        let applied = finish(executor, result).await?;
        self.states
            .save_state(&config.deployment_id, Some(&applied.state))
            .await?;
        Ok(applied)
    }

    async fn destroy_locked(
        &self,
        deployment_id: &DeploymentId,
        state: Option<StateBlob>,
    ) -> EngineResult<()> {
        let state = match state.filter(|s| !s.is_empty()) {
            Some(state) => Some(state),
            None => self.states.get_state(deployment_id).await?,
        };
        if state.is_none() {
            info!("no stored state, destroy is a no-op");
        }

        let mut executor = self.executor(deployment_id)?;

        let result = async {
            if let Some(state) = &state {
                executor.seed_state(state).await?;
            }
            executor
                .initialize(&CompiledCode::empty(), &Map::new())
                .await?;
            executor.destroy().await
        }
        .await;

        finish(executor, result).await?;
        self.states.save_state(deployment_id, None).await
    }

    async fn release(&self, deployment_id: &DeploymentId) {
        if let Err(e) = self.states.unlock_state(deployment_id).await {
            warn!(error = %e, "failed to release state lock");
        }
    }
}

async fn finish<T>(mut executor: Executor, result: EngineResult<T>) -> EngineResult<T> {
    if let Err(e) = executor.cleanup().await {
        warn!(path = %executor.path().display(), error = %e, "failed to remove working directory");
    }
    result
}

#[async_trait]
impl Provisioner for ProvisioningOrchestrator {
    #[instrument(skip_all, fields(deployment_id = %config.deployment_id))]
    async fn plan(&self, config: &InfraConfig) -> EngineResult<PlanResult> {
        let _guard = self.locks.acquire(config.deployment_id).await;
        self.states.lock_state(&config.deployment_id).await?;

        let result = self.plan_locked(config).await;
        self.release(&config.deployment_id).await;

        let plan = result?;
        info!(has_changes = plan.has_changes, "plan complete");
        Ok(plan)
    }

    #[instrument(skip_all, fields(deployment_id = %config.deployment_id))]
    async fn apply(&self, config: &InfraConfig) -> Result<ProvisionResult, ProvisionFailure> {
        let _guard = self.locks.acquire(config.deployment_id).await;
        self.states
            .lock_state(&config.deployment_id)
            .await
            .map_err(ProvisionFailure::new)?;

        let result = self.apply_locked(config).await;
        self.release(&config.deployment_id).await;

        match result {
            Ok(applied) => {
                info!(outputs = applied.outputs.len(), "apply complete");
                Ok(ProvisionResult::succeeded(applied.outputs, Some(applied.state)))
            }
            Err(e) => {
                warn!(error = %e, "apply failed");
                Err(ProvisionFailure::new(e))
            }
        }
    }

    #[instrument(skip_all, fields(deployment_id = %deployment_id))]
    async fn destroy(
        &self,
        deployment_id: &DeploymentId,
        state: Option<StateBlob>,
    ) -> Result<ProvisionResult, ProvisionFailure> {
        let _guard = self.locks.acquire(*deployment_id).await;
        self.states
            .lock_state(deployment_id)
            .await
            .map_err(ProvisionFailure::new)?;

        let result = self.destroy_locked(deployment_id, state).await;
        self.release(deployment_id).await;

        match result {
            Ok(()) => {
                info!("destroy complete");
                Ok(ProvisionResult::succeeded(Outputs::new(), None))
            }
            Err(e) => {
                warn!(error = %e, "destroy failed");
                Err(ProvisionFailure::new(e))
            }
        }
    }

    async fn get_state(&self, deployment_id: &DeploymentId) -> EngineResult<Option<StateBlob>> {
        self.states.get_state(deployment_id).await
    }
}

impl std::fmt::Debug for ProvisioningOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningOrchestrator")
            .field("executor", &self.executor)
            .field("locks", &self.locks.len())
            .finish_non_exhaustive()
    }
}
