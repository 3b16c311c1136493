//! Driving the external provisioning tool.
//!
//! An [`Executor`] owns one fresh working directory for the duration of a
//! single lifecycle call. Generated source files are written into it, the
//! tool is located and initialised, and then exactly one of plan, apply or
//! destroy runs. [`Executor::cleanup`] removes the directory; the directory
//! guard also removes it on drop.

mod command;
mod workdir;

pub use command::{Tool, ToolOutput};
pub use workdir::WorkingDir;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use keystone_compiler::CompiledCode;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult, ExecutorStep};
use crate::types::{DeploymentId, Outputs, StateBlob};

/// File the tool reads and writes its state from.
pub const STATE_FILE: &str = "terraform.tfstate";
/// Variable values passed alongside the generated source.
pub const TFVARS_FILE: &str = "terraform.tfvars.json";
/// Saved plan written by [`Executor::plan`].
const PLAN_FILE: &str = "tfplan";

const INIT_ARGS: &[&str] = &["init", "-input=false", "-no-color", "-upgrade"];
const PLAN_ARGS: &[&str] = &[
    "plan",
    "-input=false",
    "-no-color",
    "-detailed-exitcode",
    "-out=tfplan",
];
const SHOW_PLAN_ARGS: &[&str] = &["show", "-json", "-no-color", PLAN_FILE];
const APPLY_ARGS: &[&str] = &["apply", "-input=false", "-no-color", "-auto-approve"];
const OUTPUT_ARGS: &[&str] = &["output", "-json", "-no-color"];
const DESTROY_ARGS: &[&str] = &["destroy", "-input=false", "-no-color", "-auto-approve"];

/// Settings shared by every executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Tool binary name or path.
    pub binary: String,
    /// Root under which per-call working directories are created.
    pub base_dir: PathBuf,
    /// Limit for each tool invocation.
    pub command_timeout: Duration,
    /// PATH override for binary lookup and the child environment.
    pub search_path: Option<OsString>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            binary: "terraform".to_owned(),
            base_dir: std::env::temp_dir().join("keystone"),
            command_timeout: Duration::from_secs(1800),
            search_path: None,
        }
    }
}

/// Result of a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanResult {
    pub has_changes: bool,
    /// Machine-readable plan, when it could be rendered.
    pub plan_output: Option<Value>,
}

/// Result of a successful apply.
#[derive(Debug, Clone)]
pub struct ApplyResult {
    pub outputs: Outputs,
    /// Post-apply state, verbatim.
    pub state: StateBlob,
}

#[derive(Debug, Deserialize)]
struct OutputValue {
    value: Value,
}

/// One lifecycle call's worth of tool invocations.
#[derive(Debug)]
pub struct Executor {
    workdir: WorkingDir,
    binary: String,
    search_path: Option<OsString>,
    timeout: Duration,
    tool: Option<Tool>,
    cancel: CancellationToken,
}

impl Executor {
    /// Reserve a fresh working directory for a deployment.
    pub fn create(
        config: &ExecutorConfig,
        deployment_id: &DeploymentId,
        cancel: CancellationToken,
    ) -> EngineResult<Self> {
        let workdir = WorkingDir::create(&config.base_dir, deployment_id)?;
        Ok(Self {
            workdir,
            binary: config.binary.clone(),
            search_path: config.search_path.clone(),
            timeout: config.command_timeout,
            tool: None,
            cancel,
        })
    }

    /// The working directory for this call.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.workdir.path()
    }

    /// Write a prior state blob verbatim so destroy targets real resources.
    pub async fn seed_state(&self, state: &StateBlob) -> EngineResult<()> {
        self.workdir.write(STATE_FILE, state.as_bytes()).await?;
        debug!(bytes = state.len(), "state file seeded");
        Ok(())
    }

    /// Write the generated source, locate the tool and run its init step.
    pub async fn initialize(
        &mut self,
        code: &CompiledCode,
        variables: &Map<String, Value>,
    ) -> EngineResult<()> {
        for (name, contents) in code.files() {
            self.workdir.write(name, contents).await?;
        }

        if !variables.is_empty() {
            let json = serde_json::to_vec_pretty(variables).map_err(|e| {
                EngineError::executor_init(format!("failed to encode variables: {e}"))
            })?;
            self.workdir.write(TFVARS_FILE, json).await?;
        }

        let binary = self.resolve_binary()?;
        let tool = Tool::new(binary, self.search_path.clone(), self.timeout);

        let output = tool
            .run(self.workdir.path(), ExecutorStep::Init, INIT_ARGS, &self.cancel)
            .await?;
        if !output.success() {
            return Err(EngineError::executor_init(format!(
                "init: {}",
                output.failure_message()
            )));
        }

        info!(binary = %tool.binary().display(), "provisioning tool initialised");
        self.tool = Some(tool);
        Ok(())
    }

    /// Compute a plan.
    pub async fn plan(&self) -> EngineResult<PlanResult> {
        let output = self.run(ExecutorStep::Plan, PLAN_ARGS).await?;
        let has_changes = match output.code {
            0 => false,
            2 => true,
            _ => return Err(output.into_error(ExecutorStep::Plan)),
        };

        let plan_output = match self.json(ExecutorStep::Show, SHOW_PLAN_ARGS).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(error = %e, "failed to render plan output");
                None
            }
        };

        Ok(PlanResult {
            has_changes,
            plan_output,
        })
    }

    /// Apply changes and collect outputs and the resulting state.
    pub async fn apply(&self) -> EngineResult<ApplyResult> {
        let output = self.run(ExecutorStep::Apply, APPLY_ARGS).await?;
        if !output.success() {
            return Err(output.into_error(ExecutorStep::Apply));
        }

        let outputs = match self.outputs().await {
            Ok(outputs) => outputs,
            Err(e) => {
                warn!(error = %e, "failed to read outputs");
                Outputs::new()
            }
        };

        let state_path = self.workdir.path().join(STATE_FILE);
        let state = tokio::fs::read(&state_path).await.map_err(|e| {
            EngineError::executor_run(
                ExecutorStep::Apply,
                format!("failed to read {}: {e}", state_path.display()),
            )
        })?;

        Ok(ApplyResult {
            outputs,
            state: StateBlob::from(state),
        })
    }

    /// Destroy whatever the state in the working directory describes.
    pub async fn destroy(&self) -> EngineResult<()> {
        let output = self.run(ExecutorStep::Destroy, DESTROY_ARGS).await?;
        if !output.success() {
            return Err(output.into_error(ExecutorStep::Destroy));
        }
        Ok(())
    }

    /// Remove the working directory.
    pub async fn cleanup(&mut self) -> EngineResult<()> {
        self.workdir.cleanup().await
    }

    fn resolve_binary(&self) -> EngineResult<PathBuf> {
        let found = match &self.search_path {
            Some(paths) => which::which_in(&self.binary, Some(paths), self.workdir.path()),
            None => which::which(&self.binary),
        };
        found.map_err(|e| {
            EngineError::executor_init(format!("{} not found: {e}", self.binary))
        })
    }

    async fn run(&self, step: ExecutorStep, args: &[&str]) -> EngineResult<ToolOutput> {
        let tool = self
            .tool
            .as_ref()
            .ok_or_else(|| EngineError::executor_init("not initialised"))?;
        tool.run(self.workdir.path(), step, args, &self.cancel).await
    }

    async fn json(&self, step: ExecutorStep, args: &[&str]) -> EngineResult<Value> {
        let output = self.run(step, args).await?;
        if !output.success() {
            return Err(output.into_error(step));
        }
        serde_json::from_str(&output.stdout)
            .map_err(|e| EngineError::executor_run(step, format!("invalid JSON: {e}")))
    }

    async fn outputs(&self) -> EngineResult<Outputs> {
        let value = self.json(ExecutorStep::Output, OUTPUT_ARGS).await?;
        let raw: std::collections::BTreeMap<String, OutputValue> = serde_json::from_value(value)
            .map_err(|e| EngineError::executor_run(ExecutorStep::Output, e.to_string()))?;
        Ok(raw.into_iter().map(|(k, v)| (k, v.value)).collect())
    }
}
