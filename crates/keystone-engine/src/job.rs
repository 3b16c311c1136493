//! Job wire format.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{EngineError, EngineResult};
use crate::types::DeploymentId;

/// Kind of deployment job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    #[serde(rename = "deployment:provision")]
    Provision,
    #[serde(rename = "deployment:destroy")]
    Destroy,
}

impl JobKind {
    /// Name used on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Provision => "deployment:provision",
            Self::Destroy => "deployment:destroy",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job as delivered by the queue transport.
///
/// The payload is kept raw so a malformed payload surfaces as a handler error
/// rather than a transport error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "type")]
    pub kind: JobKind,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Deserialize)]
struct DeploymentPayload {
    deployment_id: String,
}

impl Job {
    #[must_use]
    pub fn provision(deployment_id: DeploymentId) -> Self {
        Self::new(JobKind::Provision, deployment_id)
    }

    #[must_use]
    pub fn destroy(deployment_id: DeploymentId) -> Self {
        Self::new(JobKind::Destroy, deployment_id)
    }

    fn new(kind: JobKind, deployment_id: DeploymentId) -> Self {
        Self {
            kind,
            payload: json!({ "deployment_id": deployment_id.to_string() }),
        }
    }

    /// Decode the deployment the job targets.
    pub fn deployment_id(&self) -> EngineResult<DeploymentId> {
        let payload = DeploymentPayload::deserialize(&self.payload)
            .map_err(|e| EngineError::InvalidPayload(e.to_string()))?;
        payload.deployment_id.parse().map_err(|e| {
            EngineError::InvalidPayload(format!(
                "deployment_id {:?} is not a UUID: {e}",
                payload.deployment_id
            ))
        })
    }
}
