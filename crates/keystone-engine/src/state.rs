//! Typestate pattern for the deployment lifecycle.
//!
//! A job drives a deployment through a fixed sequence of states. Encoding the
//! states as types means the task handler cannot, for example, mark a
//! deployment `applied` without first passing through `applying`.
//!
//! ```text
//! Pending ──▶ Planning ──▶ Applying ──▶ Applied
//!    │           │            │
//!    │           ▼            ▼
//!    ├──────▶  Failed  ◀──────┤
//!    │           ▲
//!    ▼           │
//! Destroying ────┴──────────────────▶ Destroyed
//! ```
//!
//! # Example
//!
//! ```ignore
//! let pending = Deployment::<Pending>::create(data);
//! let applying = pending.start_planning().start_applying();
//! let applied = applying.complete(outputs, Some(blob));
//! // applied.start_applying() would not compile
//! ```

use std::marker::PhantomData;

use crate::error::{EngineError, EngineResult};
use crate::types::{DeploymentData, DeploymentStatus, Outputs, StateBlob};

// =============================================================================
// State marker types (zero-sized)
// =============================================================================

/// Marker trait for deployment states.
pub trait DeploymentState: private::Sealed + Send + Sync {
    /// Get the persisted status for this state.
    fn status() -> DeploymentStatus;
}

mod private {
    pub trait Sealed {}
}

/// Created, waiting for a job.
#[derive(Debug, Clone, Copy)]
pub struct Pending;

/// Provision job started; loading context.
#[derive(Debug, Clone, Copy)]
pub struct Planning;

/// Applying changes.
#[derive(Debug, Clone, Copy)]
pub struct Applying;

/// Infrastructure provisioned.
#[derive(Debug, Clone, Copy)]
pub struct Applied;

/// Tearing infrastructure down.
#[derive(Debug, Clone, Copy)]
pub struct Destroying;

/// Infrastructure torn down.
#[derive(Debug, Clone, Copy)]
pub struct Destroyed;

/// A job failed or the deployment was cancelled.
#[derive(Debug, Clone, Copy)]
pub struct Failed;

macro_rules! deployment_state {
    ($($marker:ident => $status:ident),* $(,)?) => {
        $(
            impl private::Sealed for $marker {}

            impl DeploymentState for $marker {
                fn status() -> DeploymentStatus {
                    DeploymentStatus::$status
                }
            }
        )*
    };
}

deployment_state! {
    Pending => Pending,
    Planning => Planning,
    Applying => Applying,
    Applied => Applied,
    Destroying => Destroying,
    Destroyed => Destroyed,
    Failed => Failed,
}

// =============================================================================
// Deployment struct parameterised by state
// =============================================================================

/// A deployment in a specific state.
#[derive(Debug)]
pub struct Deployment<S: DeploymentState> {
    data: DeploymentData,
    _state: PhantomData<S>,
}

impl<S: DeploymentState> Deployment<S> {
    /// Get a reference to the deployment data.
    #[must_use]
    pub const fn data(&self) -> &DeploymentData {
        &self.data
    }

    /// Get the current state as a persisted status.
    #[must_use]
    pub fn status(&self) -> DeploymentStatus {
        S::status()
    }

    fn transition<T: DeploymentState>(self) -> Deployment<T> {
        self.transition_with(|_| {})
    }

    fn transition_with<T: DeploymentState>(
        mut self,
        f: impl FnOnce(&mut DeploymentData),
    ) -> Deployment<T> {
        f(&mut self.data);
        self.data.updated_at = chrono::Utc::now();
        Deployment {
            data: self.data,
            _state: PhantomData,
        }
    }

    fn into_failed(self, error: String) -> Deployment<Failed> {
        self.transition_with(|data| data.error = Some(error))
    }
}

// =============================================================================
// State transitions
// =============================================================================

impl Deployment<Pending> {
    /// Create a new deployment in the pending state.
    #[must_use]
    pub const fn create(data: DeploymentData) -> Self {
        Self {
            data,
            _state: PhantomData,
        }
    }

    /// Start a provision run.
    #[must_use]
    pub fn start_planning(self) -> Deployment<Planning> {
        self.transition_with(|data| data.error = None)
    }

    /// Start a destroy run.
    #[must_use]
    pub fn start_destroying(self) -> Deployment<Destroying> {
        self.transition_with(|data| data.error = None)
    }

    /// Fail before any run started.
    #[must_use]
    pub fn fail(self, error: String) -> Deployment<Failed> {
        self.into_failed(error)
    }
}

impl Deployment<Planning> {
    /// Context is ready; hand over to the provisioning tool.
    #[must_use]
    pub fn start_applying(self) -> Deployment<Applying> {
        self.transition()
    }

    /// Fail while preparing context.
    #[must_use]
    pub fn fail(self, error: String) -> Deployment<Failed> {
        self.into_failed(error)
    }
}

impl Deployment<Applying> {
    /// Record a successful apply.
    #[must_use]
    pub fn complete(self, outputs: Outputs, state: Option<StateBlob>) -> Deployment<Applied> {
        self.transition_with(|data| {
            data.outputs = outputs;
            if state.is_some() {
                data.terraform_state = data.terraform_state.next(state);
            }
        })
    }

    /// Fail during apply.
    #[must_use]
    pub fn fail(self, error: String) -> Deployment<Failed> {
        self.into_failed(error)
    }
}

impl Deployment<Destroying> {
    /// The stored state blob to seed the destroy with.
    #[must_use]
    pub fn state_blob(&self) -> Option<&StateBlob> {
        self.data.terraform_state.blob()
    }

    /// Record a successful destroy. Stored state is cleared.
    #[must_use]
    pub fn complete(self) -> Deployment<Destroyed> {
        self.transition_with(|data| {
            data.terraform_state = data.terraform_state.next(None);
        })
    }

    /// Fail during destroy.
    #[must_use]
    pub fn fail(self, error: String) -> Deployment<Failed> {
        self.into_failed(error)
    }
}

// =============================================================================
// Loading from persisted state
// =============================================================================

/// A type-erased deployment that can be in any state.
///
/// This is used when loading from the store where the state is not known at
/// compile time.
#[derive(Debug)]
pub enum AnyDeployment {
    Pending(Deployment<Pending>),
    Planning(Deployment<Planning>),
    Applying(Deployment<Applying>),
    Applied(Deployment<Applied>),
    Destroying(Deployment<Destroying>),
    Destroyed(Deployment<Destroyed>),
    Failed(Deployment<Failed>),
}

impl AnyDeployment {
    /// Create an `AnyDeployment` from data and persisted status.
    #[must_use]
    pub const fn from_persisted(data: DeploymentData, status: DeploymentStatus) -> Self {
        match status {
            DeploymentStatus::Pending => Self::Pending(Deployment {
                data,
                _state: PhantomData,
            }),
            DeploymentStatus::Planning => Self::Planning(Deployment {
                data,
                _state: PhantomData,
            }),
            DeploymentStatus::Applying => Self::Applying(Deployment {
                data,
                _state: PhantomData,
            }),
            DeploymentStatus::Applied => Self::Applied(Deployment {
                data,
                _state: PhantomData,
            }),
            DeploymentStatus::Destroying => Self::Destroying(Deployment {
                data,
                _state: PhantomData,
            }),
            DeploymentStatus::Destroyed => Self::Destroyed(Deployment {
                data,
                _state: PhantomData,
            }),
            DeploymentStatus::Failed => Self::Failed(Deployment {
                data,
                _state: PhantomData,
            }),
        }
    }

    /// Get a reference to the deployment data.
    #[must_use]
    pub const fn data(&self) -> &DeploymentData {
        match self {
            Self::Pending(d) => d.data(),
            Self::Planning(d) => d.data(),
            Self::Applying(d) => d.data(),
            Self::Applied(d) => d.data(),
            Self::Destroying(d) => d.data(),
            Self::Destroyed(d) => d.data(),
            Self::Failed(d) => d.data(),
        }
    }

    /// Get the current status.
    #[must_use]
    pub const fn status(&self) -> DeploymentStatus {
        match self {
            Self::Pending(_) => DeploymentStatus::Pending,
            Self::Planning(_) => DeploymentStatus::Planning,
            Self::Applying(_) => DeploymentStatus::Applying,
            Self::Applied(_) => DeploymentStatus::Applied,
            Self::Destroying(_) => DeploymentStatus::Destroying,
            Self::Destroyed(_) => DeploymentStatus::Destroyed,
            Self::Failed(_) => DeploymentStatus::Failed,
        }
    }

    /// Check if the deployment is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Re-arm the deployment for a delivered job.
    ///
    /// Jobs are delivered at least once, so a job may find its deployment
    /// mid-flight or already finished from an earlier attempt. The job is
    /// authoritative and the run restarts from `pending`.
    #[must_use]
    pub fn rearm(self) -> Deployment<Pending> {
        match self {
            Self::Pending(d) => d,
            Self::Planning(d) => d.transition(),
            Self::Applying(d) => d.transition(),
            Self::Applied(d) => d.transition(),
            Self::Destroying(d) => d.transition(),
            Self::Destroyed(d) => d.transition(),
            Self::Failed(d) => d.transition(),
        }
    }

    /// Force a non-terminal deployment into `failed`.
    ///
    /// Any external process already running is left alone.
    pub fn cancel(self, reason: impl Into<String>) -> EngineResult<Deployment<Failed>> {
        let reason = reason.into();
        match self {
            Self::Pending(d) => Ok(d.fail(reason)),
            Self::Planning(d) => Ok(d.fail(reason)),
            Self::Applying(d) => Ok(d.fail(reason)),
            Self::Destroying(d) => Ok(d.fail(reason)),
            terminal => Err(EngineError::InvalidStateTransition {
                from: terminal.status().as_str(),
                to: DeploymentStatus::Failed.as_str(),
            }),
        }
    }
}
