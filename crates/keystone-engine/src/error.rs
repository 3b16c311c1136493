//! Error types for keystone-engine.

use std::fmt;

use keystone_compiler::CompileError;

/// Result type alias using [`EngineError`].
pub type EngineResult<T> = Result<T, EngineError>;

/// Provisioning tool step, used for error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorStep {
    Init,
    Plan,
    Apply,
    Output,
    Show,
    Destroy,
}

impl ExecutorStep {
    /// Tool subcommand for this step.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Plan => "plan",
            Self::Apply => "apply",
            Self::Output => "output",
            Self::Show => "show",
            Self::Destroy => "destroy",
        }
    }
}

impl fmt::Display for ExecutorStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur in the provisioning engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Graph compilation failed.
    #[error("compile graph: {0}")]
    Compile(#[from] CompileError),

    /// Working directory or provisioning binary could not be prepared.
    #[error("executor initialize: {0}")]
    ExecutorInit(String),

    /// A provisioning tool step failed, timed out or was cancelled.
    #[error("executor {step}: {message}")]
    ExecutorRun {
        /// Step that failed.
        step: ExecutorStep,
        /// Failure detail, usually the tail of the tool's stderr.
        message: String,
    },

    /// State persistence failed.
    #[error("state store: {0}")]
    StateStore(String),

    /// A deployment, project or graph does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// A job payload could not be decoded.
    #[error("invalid job payload: {0}")]
    InvalidPayload(String),

    /// Invalid state transition attempted.
    #[error("invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: &'static str,
        /// Attempted target state.
        to: &'static str,
    },

    /// The job queue is at capacity.
    #[error("job queue is full")]
    QueueFull,

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Create an executor initialisation error.
    #[must_use]
    pub fn executor_init(msg: impl Into<String>) -> Self {
        Self::ExecutorInit(msg.into())
    }

    /// Create an executor run error for a step.
    #[must_use]
    pub fn executor_run(step: ExecutorStep, msg: impl Into<String>) -> Self {
        Self::ExecutorRun {
            step,
            message: msg.into(),
        }
    }

    /// Create a state store error.
    #[must_use]
    pub fn state_store(msg: impl Into<String>) -> Self {
        Self::StateStore(msg.into())
    }

    /// Create a not-found error.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the error came from the resource graph rather than the
    /// environment. Retrying such a job cannot succeed.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::Compile(_) | Self::InvalidPayload(_) | Self::NotFound { .. }
        )
    }
}
