//! Core types for keystone-engine.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use keystone_compiler::{CloudConfig, Edge, Node, ResourceGraph};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Wrap an existing UUID.
            #[must_use]
            pub const fn new(id: Uuid) -> Self {
                Self(id)
            }

            /// Generate a new random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Get the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a deployment.
    DeploymentId
);
uuid_id!(
    /// Unique identifier for a project.
    ProjectId
);
uuid_id!(
    /// Unique identifier for a stored graph version.
    GraphId
);

/// Resource outputs keyed by output name.
pub type Outputs = BTreeMap<String, Value>;

/// Deployment status as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Created, waiting for a job.
    Pending,
    /// Provision job picked up; context is being prepared.
    Planning,
    /// The provisioning tool is applying changes.
    Applying,
    /// Infrastructure is provisioned.
    Applied,
    /// The provisioning tool is tearing infrastructure down.
    Destroying,
    /// Infrastructure has been torn down.
    Destroyed,
    /// The last job failed or the deployment was cancelled.
    Failed,
}

impl DeploymentStatus {
    /// Get the status name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Planning => "planning",
            Self::Applying => "applying",
            Self::Applied => "applied",
            Self::Destroying => "destroying",
            Self::Destroyed => "destroyed",
            Self::Failed => "failed",
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Applied | Self::Destroyed | Self::Failed)
    }

    /// Whether `next` directly follows this status in the lifecycle.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Planning | Self::Destroying | Self::Failed)
                | (Self::Planning, Self::Applying | Self::Failed)
                | (Self::Applying, Self::Applied | Self::Failed)
                | (Self::Destroying, Self::Destroyed | Self::Failed)
        )
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "planning" => Ok(Self::Planning),
            "applying" => Ok(Self::Applying),
            "applied" => Ok(Self::Applied),
            "destroying" => Ok(Self::Destroying),
            "destroyed" => Ok(Self::Destroyed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown deployment status: {s}")),
        }
    }
}

/// Severity of a deployment log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// A structured entry in a deployment's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl LogEntry {
    /// Create an entry stamped with the current time.
    #[must_use]
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    #[must_use]
    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, message)
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }

    /// Attach structured data to the entry.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Opaque provisioning-tool state. Never parsed by the engine.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateBlob(Bytes);

impl StateBlob {
    /// Wrap raw state bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for StateBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateBlob({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for StateBlob {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

/// What the state store holds for a deployment.
///
/// `Cleared` is distinct from `NeverApplied`: it records that state existed
/// and was explicitly removed, usually by a successful destroy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoredState {
    /// No state has ever been saved.
    #[default]
    NeverApplied,
    /// State was saved and later cleared.
    Cleared {
        /// Version of the clearing write.
        version: u64,
    },
    /// State is present.
    Present {
        /// Version of the write that stored this blob.
        version: u64,
        /// The blob itself.
        blob: StateBlob,
    },
}

impl StoredState {
    /// Build from a version counter and an optional blob, as persisted in a
    /// row. Version `0` means nothing was ever written.
    #[must_use]
    pub fn from_parts(version: u64, blob: Option<StateBlob>) -> Self {
        match (version, blob) {
            (0, _) => Self::NeverApplied,
            (version, None) => Self::Cleared { version },
            (version, Some(blob)) => Self::Present { version, blob },
        }
    }

    /// Monotonic write counter; `0` when never written.
    #[must_use]
    pub const fn version(&self) -> u64 {
        match self {
            Self::NeverApplied => 0,
            Self::Cleared { version } | Self::Present { version, .. } => *version,
        }
    }

    /// The stored blob, if any.
    #[must_use]
    pub const fn blob(&self) -> Option<&StateBlob> {
        match self {
            Self::Present { blob, .. } => Some(blob),
            Self::NeverApplied | Self::Cleared { .. } => None,
        }
    }

    /// Apply a write, bumping the version.
    #[must_use]
    pub fn next(&self, blob: Option<StateBlob>) -> Self {
        let version = self.version() + 1;
        match blob {
            Some(blob) => Self::Present { version, blob },
            None => Self::Cleared { version },
        }
    }
}

/// Data shared across all deployment states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentData {
    /// Unique deployment identifier.
    pub id: DeploymentId,
    /// Project this deployment belongs to.
    pub project_id: ProjectId,
    /// Graph version being deployed.
    pub graph_id: GraphId,
    /// Outputs from the last successful apply.
    #[serde(default)]
    pub outputs: Outputs,
    /// Provisioning-tool state.
    #[serde(default)]
    pub terraform_state: StoredState,
    /// Append-only log.
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    /// When the deployment was created.
    pub created_at: DateTime<Utc>,
    /// When the deployment was last updated.
    pub updated_at: DateTime<Utc>,
    /// Error message if the deployment failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeploymentData {
    /// Create data for a new deployment of a graph.
    #[must_use]
    pub fn new(project_id: ProjectId, graph_id: GraphId) -> Self {
        let now = Utc::now();
        Self {
            id: DeploymentId::generate(),
            project_id,
            graph_id,
            outputs: Outputs::new(),
            terraform_state: StoredState::NeverApplied,
            logs: Vec::new(),
            created_at: now,
            updated_at: now,
            error: None,
        }
    }
}

/// A deployment record as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    #[serde(flatten)]
    pub data: DeploymentData,
    pub status: DeploymentStatus,
}

impl DeploymentRecord {
    /// Create a new deployment record in the pending state.
    #[must_use]
    pub const fn new(data: DeploymentData) -> Self {
        Self {
            data,
            status: DeploymentStatus::Pending,
        }
    }
}

/// The slice of a project the engine reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    /// Provider name, e.g. `aws`.
    pub cloud_provider: String,
    /// Free-form settings; `region` and `credentials` are consulted.
    #[serde(default)]
    pub settings: Value,
}

impl Project {
    #[must_use]
    pub fn new(name: impl Into<String>, cloud_provider: impl Into<String>, settings: Value) -> Self {
        Self {
            id: ProjectId::generate(),
            name: name.into(),
            cloud_provider: cloud_provider.into(),
            settings,
        }
    }

    /// Cloud configuration derived from the provider and settings.
    #[must_use]
    pub fn cloud_config(&self) -> CloudConfig {
        CloudConfig::from_settings(self.cloud_provider.clone(), &self.settings)
    }
}

/// A stored graph version. Nodes and edges are kept as raw JSON documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRecord {
    pub id: GraphId,
    pub project_id: ProjectId,
    pub version: i32,
    #[serde(default)]
    pub nodes: Value,
    #[serde(default)]
    pub edges: Value,
}

impl GraphRecord {
    /// Create a record from an in-memory graph.
    pub fn from_graph(project_id: ProjectId, version: i32, graph: &ResourceGraph) -> EngineResult<Self> {
        let encode = |what: &str, e: serde_json::Error| {
            EngineError::Serialisation(format!("encode graph {what}: {e}"))
        };
        Ok(Self {
            id: GraphId::generate(),
            project_id,
            version,
            nodes: serde_json::to_value(&graph.nodes).map_err(|e| encode("nodes", e))?,
            edges: serde_json::to_value(&graph.edges).map_err(|e| encode("edges", e))?,
        })
    }

    /// Decode the stored documents. `null` documents decode as empty lists.
    pub fn decode(&self) -> EngineResult<ResourceGraph> {
        let nodes: Vec<Node> = decode_list(&self.nodes, "nodes")?;
        let edges: Vec<Edge> = decode_list(&self.edges, "edges")?;
        Ok(ResourceGraph::new(nodes, edges))
    }
}

fn decode_list<T: serde::de::DeserializeOwned>(value: &Value, what: &str) -> EngineResult<Vec<T>> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    Vec::<T>::deserialize(value)
        .map_err(|e| EngineError::Serialisation(format!("decode graph {what}: {e}")))
}

/// Everything one lifecycle call needs.
#[derive(Debug, Clone)]
pub struct InfraConfig {
    pub deployment_id: DeploymentId,
    pub project_id: ProjectId,
    pub graph_id: GraphId,
    pub graph: ResourceGraph,
    pub cloud: CloudConfig,
    /// Values written to `terraform.tfvars.json` when non-empty.
    pub variables: Map<String, Value>,
}
