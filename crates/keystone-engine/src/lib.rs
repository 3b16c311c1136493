//! Keystone deployment provisioning engine.
//!
//! This crate provides:
//! - An executor that drives the external provisioning tool in a fresh,
//!   self-cleaning working directory per call
//! - State stores (in-memory and PostgreSQL) for the opaque tool state
//! - The provisioning orchestrator composing compiler, executor and store
//! - The deployment lifecycle as a typestate machine
//! - A task handler, job queue and worker pool consuming deployment jobs
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │  Job Queue   │───▶│    Worker    │───▶│ Task Handler │
//! └──────────────┘    └──────────────┘    └──────────────┘
//!                                                │
//!                                                ▼
//!                                        ┌──────────────┐
//!                                        │ Orchestrator │
//!                                        └──────────────┘
//!                                                │
//!         ┌──────────────────────┬───────────────┤
//!         ▼                      ▼               ▼
//!  ┌──────────────┐      ┌──────────────┐ ┌──────────────┐
//!  │   Compiler   │      │   Executor   │ │ State Store  │
//!  └──────────────┘      └──────────────┘ └──────────────┘
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod executor;
pub mod handler;
pub mod job;
pub mod locks;
pub mod orchestrator;
pub mod queue;
pub mod state;
pub mod store;
pub mod types;
pub mod worker;

// Re-export configuration types
pub use config::{
    DatabaseConfig, EngineConfig, ExecutorSettings, LogFormat, LoggingSettings, StoreBackend,
    StoreSettings, WorkerSettings,
};

// Re-export error types
pub use error::{EngineError, EngineResult, ExecutorStep};

// Re-export core types
pub use types::{
    DeploymentData, DeploymentId, DeploymentRecord, DeploymentStatus, GraphId, GraphRecord,
    InfraConfig, LogEntry, LogLevel, Outputs, Project, ProjectId, StateBlob, StoredState,
};

// Re-export executor types
pub use executor::{ApplyResult, Executor, ExecutorConfig, PlanResult};

// Re-export orchestration types
pub use handler::TaskHandler;
pub use job::{Job, JobKind};
pub use locks::{DeploymentGuard, DeploymentLocks};
pub use orchestrator::{ProvisionFailure, ProvisionResult, Provisioner, ProvisioningOrchestrator};
pub use queue::JobQueue;
pub use state::{AnyDeployment, Deployment};
pub use store::{DeploymentStore, MemoryStore, PostgresStore, StateStore};
pub use worker::{spawn_workers, Worker};
