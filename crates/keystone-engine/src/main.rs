//! Keystone worker binary.
//!
//! Runs a pool of deployment workers, or a single job, against the configured
//! store and provisioning tool.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use keystone_engine::{
    spawn_workers, DeploymentId, DeploymentStore, EngineConfig, Job, JobQueue, LogFormat,
    LoggingSettings, MemoryStore, PostgresStore, ProvisioningOrchestrator, StateStore,
    StoreBackend, TaskHandler,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Keystone deployment worker.
#[derive(Parser, Debug)]
#[command(name = "keystone-worker")]
#[command(about = "Provision and destroy deployments with an external provisioning tool")]
#[command(version)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the worker pool, reading jobs as JSON lines from stdin (default).
    Run,
    /// Provision one deployment and exit.
    Provision {
        /// Deployment to provision.
        deployment_id: DeploymentId,
    },
    /// Destroy one deployment and exit.
    Destroy {
        /// Deployment to destroy.
        deployment_id: DeploymentId,
    },
    /// Mark a non-terminal deployment as failed.
    Cancel {
        /// Deployment to cancel.
        deployment_id: DeploymentId,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (config, load_error) = match EngineConfig::load(cli.config.as_deref()) {
        Ok(config) => (config, None),
        Err(e) => (EngineConfig::default(), Some(e)),
    };

    init_tracing(&config.logging, cli.verbose);

    if let Some(e) = load_error {
        info!(error = %e, "Failed to load config, using defaults");
    }

    info!(
        binary = %config.executor.binary,
        working_dir = %config.executor.working_dir.display(),
        workers = config.worker.count,
        store = ?config.store.backend,
        "Configuration loaded"
    );

    if let Err(e) = tokio::fs::create_dir_all(&config.executor.working_dir).await {
        error!(
            error = %e,
            path = %config.executor.working_dir.display(),
            "Failed to create working directory root"
        );
    }

    let (deployments, states) = open_stores(&config).await?;

    let cancel = CancellationToken::new();
    let orchestrator = ProvisioningOrchestrator::new(config.executor.to_executor_config(), states)
        .with_cancellation(cancel.child_token());
    let handler = TaskHandler::new(deployments, Arc::new(orchestrator));

    tokio::spawn(shutdown_signal(cancel.clone()));

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_pool(&config, &handler, &cancel).await,
        Command::Provision { deployment_id } => handler
            .handle(&Job::provision(deployment_id))
            .await
            .with_context(|| format!("provision {deployment_id}"))?,
        Command::Destroy { deployment_id } => handler
            .handle(&Job::destroy(deployment_id))
            .await
            .with_context(|| format!("destroy {deployment_id}"))?,
        Command::Cancel { deployment_id } => handler
            .cancel(&deployment_id)
            .await
            .with_context(|| format!("cancel {deployment_id}"))?,
    }

    info!("Keystone worker shutdown complete");
    Ok(())
}

fn init_tracing(logging: &LoggingSettings, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let directives = format!(
        "keystone_engine={level},keystone_compiler={level},keystone_worker={level}"
    );
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn open_stores(
    config: &EngineConfig,
) -> anyhow::Result<(Arc<dyn DeploymentStore>, Arc<dyn StateStore>)> {
    match config.store.backend {
        StoreBackend::Memory => {
            warn!("Using in-memory store, deployments are lost on exit");
            let store = Arc::new(MemoryStore::new());
            let deployments: Arc<dyn DeploymentStore> = store.clone();
            let states: Arc<dyn StateStore> = store;
            Ok((deployments, states))
        }
        StoreBackend::Postgres => {
            let store = Arc::new(
                PostgresStore::new(&config.database)
                    .await
                    .context("connect to PostgreSQL")?,
            );
            info!("Connected to PostgreSQL");
            let deployments: Arc<dyn DeploymentStore> = store.clone();
            let states: Arc<dyn StateStore> = store;
            Ok((deployments, states))
        }
    }
}

async fn run_pool(config: &EngineConfig, handler: &TaskHandler, cancel: &CancellationToken) {
    let queue = Arc::new(JobQueue::new(config.worker.max_queue_size));
    let workers = spawn_workers(config.worker.count, &queue, handler, cancel);
    let feeder = tokio::spawn(feed_stdin(Arc::clone(&queue), cancel.clone()));

    for worker in workers {
        if let Err(e) = worker.await {
            error!(error = %e, "Worker task failed");
        }
    }
    feeder.abort();
}

async fn feed_stdin(queue: Arc<JobQueue>, cancel: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Job>(line) {
                    Ok(job) => {
                        if let Err(e) = queue.submit(job).await {
                            warn!(error = %e, "Job dropped");
                        }
                    }
                    Err(e) => warn!(error = %e, "Ignoring malformed job"),
                }
            }
            Ok(None) => {
                info!("Job input closed");
                break;
            }
            Err(e) => {
                error!(error = %e, "Failed to read jobs");
                break;
            }
        }
    }

    queue.close();
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
        () = cancel.cancelled() => return,
    }

    cancel.cancel();
}
