//! Common test utilities for engine integration tests.

#![allow(dead_code)]

pub mod fixtures;

use std::ffi::OsString;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use keystone_compiler::ResourceGraph;
use keystone_engine::{
    DeploymentData, DeploymentId, DeploymentRecord, DeploymentStatus, DeploymentStore,
    EngineResult, ExecutorConfig, GraphId, GraphRecord, LogEntry, MemoryStore, Outputs, Project,
    ProjectId, ProvisioningOrchestrator, StateBlob, StateStore, StoredState, TaskHandler,
};
use serde_json::json;
use tempfile::TempDir;

const FAKE_TOOL: &str = r#"#!/bin/sh
TOOL_DIR='@TOOL_DIR@'
echo "$1 $(pwd -P)" >> "$TOOL_DIR/invocations.log"
if [ -e "$TOOL_DIR/fail-$1" ]; then
  echo "Error: simulated $1 failure" >&2
  exit 1
fi
case "$1" in
  init)
    echo "Terraform has been successfully initialized!"
    ;;
  plan)
    : > tfplan
    exit 2
    ;;
  show)
    echo '{"format_version":"1.2","resource_changes":[]}'
    ;;
  apply)
    serial=$(cat "$TOOL_DIR/serial" 2>/dev/null || echo 0)
    serial=$((serial + 1))
    echo "$serial" > "$TOOL_DIR/serial"
    printf '{"version":4,"serial":%s}' "$serial" > terraform.tfstate
    echo "Apply complete!"
    ;;
  output)
    echo '{"web_id":{"sensitive":false,"type":"string","value":"i-0fake"}}'
    ;;
  destroy)
    if [ -f terraform.tfstate ]; then
      cp terraform.tfstate "$TOOL_DIR/destroyed-state"
    fi
    echo "Destroy complete!"
    ;;
esac
exit 0
"#;

/// A stand-in for the provisioning tool that records how it was invoked.
///
/// Create a `fail-<step>` marker with [`FakeTool::fail`] to make a step exit
/// non-zero.
pub struct FakeTool {
    dir: TempDir,
}

impl FakeTool {
    pub fn install() -> Self {
        let dir = TempDir::new().unwrap();
        let script = FAKE_TOOL.replace("@TOOL_DIR@", &dir.path().display().to_string());

        let bin = dir.path().join("bin");
        std::fs::create_dir(&bin).unwrap();
        let path = bin.join("terraform");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        Self { dir }
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.dir.path().join("bin")
    }

    /// PATH with the fake tool first, so the script still finds coreutils.
    pub fn search_path(&self) -> OsString {
        let mut paths = vec![self.bin_dir()];
        if let Some(existing) = std::env::var_os("PATH") {
            paths.extend(std::env::split_paths(&existing));
        }
        std::env::join_paths(paths).unwrap()
    }

    pub fn fail(&self, step: &str) {
        std::fs::write(self.dir.path().join(format!("fail-{step}")), "").unwrap();
    }

    /// Subcommands invoked so far, in order.
    pub fn invocations(&self) -> Vec<String> {
        self.log_lines()
            .into_iter()
            .map(|(command, _)| command)
            .collect()
    }

    /// Working directories the tool ran in, deduplicated in order.
    pub fn working_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = Vec::new();
        for (_, dir) in self.log_lines() {
            if dirs.last() != Some(&dir) {
                dirs.push(dir);
            }
        }
        dirs
    }

    /// State file contents present when destroy last ran.
    pub fn destroyed_state(&self) -> Option<String> {
        std::fs::read_to_string(self.dir.path().join("destroyed-state")).ok()
    }

    fn log_lines(&self) -> Vec<(String, PathBuf)> {
        let log = std::fs::read_to_string(self.dir.path().join("invocations.log")).unwrap_or_default();
        log.lines()
            .filter_map(|line| line.split_once(' '))
            .map(|(command, dir)| (command.to_owned(), PathBuf::from(dir)))
            .collect()
    }
}

/// Memory store that records every status write.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    statuses: Mutex<Vec<(DeploymentId, DeploymentStatus)>>,
}

impl RecordingStore {
    /// Statuses written for one deployment, in order.
    pub fn statuses(&self, id: &DeploymentId) -> Vec<DeploymentStatus> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, _)| d == id)
            .map(|(_, s)| *s)
            .collect()
    }
}

#[async_trait]
impl DeploymentStore for RecordingStore {
    async fn insert_project(&self, project: &Project) -> EngineResult<()> {
        self.inner.insert_project(project).await
    }

    async fn insert_graph(&self, graph: &GraphRecord) -> EngineResult<()> {
        self.inner.insert_graph(graph).await
    }

    async fn insert_deployment(&self, record: &DeploymentRecord) -> EngineResult<()> {
        self.inner.insert_deployment(record).await
    }

    async fn get_deployment(&self, id: &DeploymentId) -> EngineResult<Option<DeploymentRecord>> {
        self.inner.get_deployment(id).await
    }

    async fn get_project(&self, id: &ProjectId) -> EngineResult<Option<Project>> {
        self.inner.get_project(id).await
    }

    async fn get_graph(&self, id: &GraphId) -> EngineResult<Option<GraphRecord>> {
        self.inner.get_graph(id).await
    }

    async fn update_status(
        &self,
        id: &DeploymentId,
        status: DeploymentStatus,
        error: Option<&str>,
    ) -> EngineResult<()> {
        self.statuses.lock().unwrap().push((*id, status));
        self.inner.update_status(id, status, error).await
    }

    async fn save_outputs(&self, id: &DeploymentId, outputs: &Outputs) -> EngineResult<()> {
        self.inner.save_outputs(id, outputs).await
    }

    async fn append_log(&self, id: &DeploymentId, entry: &LogEntry) -> EngineResult<()> {
        self.inner.append_log(id, entry).await
    }
}

#[async_trait]
impl StateStore for RecordingStore {
    async fn save_state(&self, id: &DeploymentId, state: Option<&StateBlob>) -> EngineResult<()> {
        self.inner.save_state(id, state).await
    }

    async fn load_state(&self, id: &DeploymentId) -> EngineResult<StoredState> {
        self.inner.load_state(id).await
    }
}

/// Complete engine wired to a fake tool and an in-memory store.
pub struct TestEngine {
    pub tool: FakeTool,
    pub work_root: TempDir,
    pub store: Arc<RecordingStore>,
    pub orchestrator: Arc<ProvisioningOrchestrator>,
    pub handler: TaskHandler,
}

impl TestEngine {
    pub fn new() -> Self {
        let tool = FakeTool::install();
        let work_root = TempDir::new().unwrap();
        let store = Arc::new(RecordingStore::default());

        let orchestrator = Arc::new(ProvisioningOrchestrator::new(
            executor_config(&tool, work_root.path()),
            store.clone(),
        ));
        let handler = TaskHandler::new(store.clone(), orchestrator.clone());

        Self {
            tool,
            work_root,
            store,
            orchestrator,
            handler,
        }
    }

    /// Store a project, graph and pending deployment; return the deployment.
    pub async fn seed(&self, graph: &ResourceGraph) -> DeploymentId {
        let project = Project::new("integration", "aws", json!({"region": "us-east-1"}));
        self.store.insert_project(&project).await.unwrap();

        let graph = GraphRecord::from_graph(project.id, 1, graph).unwrap();
        self.store.insert_graph(&graph).await.unwrap();

        let record = DeploymentRecord::new(DeploymentData::new(project.id, graph.id));
        self.store.insert_deployment(&record).await.unwrap();
        record.data.id
    }

    pub async fn record(&self, id: &DeploymentId) -> DeploymentRecord {
        self.store.get_deployment(id).await.unwrap().unwrap()
    }

    /// Working directories left behind for a deployment.
    pub fn leftover_dirs(&self, id: &DeploymentId) -> usize {
        std::fs::read_dir(self.work_root.path().join(id.to_string()))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

pub fn executor_config(tool: &FakeTool, work_root: &Path) -> ExecutorConfig {
    ExecutorConfig {
        binary: "terraform".to_owned(),
        base_dir: work_root.to_path_buf(),
        command_timeout: Duration::from_secs(30),
        search_path: Some(tool.search_path()),
    }
}
