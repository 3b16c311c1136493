//! Engine configuration.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::{EngineError, EngineResult};
use crate::executor::ExecutorConfig;

/// Top-level configuration for the engine and its worker binary.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub executor: ExecutorSettings,

    #[serde(default)]
    pub worker: WorkerSettings,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl EngineConfig {
    /// Load configuration from file and environment.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `keystone.toml` in the current directory (if present)
    /// 3. Specified config file path (if provided)
    /// 4. Environment variables with `KEYSTONE_` prefix, `__` separating sections
    pub fn load(path: Option<&str>) -> EngineResult<Self> {
        let mut figment = Figment::new().merge(Toml::file("keystone.toml"));

        if let Some(p) = path {
            figment = figment.merge(Toml::file(p));
        }

        figment
            .merge(Env::prefixed("KEYSTONE_").split("__"))
            .extract()
            .map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Load configuration from a single TOML file, ignoring the environment.
    pub fn from_file(path: &str) -> EngineResult<Self> {
        Figment::new()
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| EngineError::Config(e.to_string()))
    }
}

/// Provisioning tool settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSettings {
    /// Tool binary name or path.
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Root for per-call working directories.
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    /// Limit for each tool invocation, in seconds.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// PATH override for locating and running the tool.
    #[serde(default)]
    pub search_path: Option<String>,
}

impl ExecutorSettings {
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Settings in the form the executor takes.
    #[must_use]
    pub fn to_executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            binary: self.binary.clone(),
            base_dir: self.working_dir.clone(),
            command_timeout: self.command_timeout(),
            search_path: self.search_path.as_ref().map(OsString::from),
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            working_dir: default_working_dir(),
            command_timeout_secs: default_command_timeout_secs(),
            search_path: None,
        }
    }
}

fn default_binary() -> String {
    "terraform".to_owned()
}

fn default_working_dir() -> PathBuf {
    std::env::temp_dir().join("keystone")
}

const fn default_command_timeout_secs() -> u64 {
    1800
}

/// Worker pool settings.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
    /// Number of concurrent workers.
    #[serde(default = "default_worker_count")]
    pub count: usize,

    /// Maximum number of buffered jobs.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            max_queue_size: default_max_queue_size(),
        }
    }
}

const fn default_worker_count() -> usize {
    10
}

const fn default_max_queue_size() -> usize {
    1000
}

/// Store backend selection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub backend: StoreBackend,
}

/// Where deployments and state live.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process memory; lost on exit.
    #[default]
    Memory,
    /// PostgreSQL via [`DatabaseConfig`].
    Postgres,
}

/// PostgreSQL connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_database_url() -> String {
    "postgres://localhost/keystone".to_owned()
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_connect_timeout_secs() -> u64 {
    5
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default)]
    pub format: LogFormat,

    /// Default level when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.executor.binary, "terraform");
        assert_eq!(config.executor.command_timeout(), Duration::from_secs(1800));
        assert!(config.executor.search_path.is_none());
        assert_eq!(config.worker.count, 10);
        assert_eq!(config.worker.max_queue_size, 1000);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn parse_partial_toml() {
        let config: EngineConfig = toml::from_str(
            r#"
            [executor]
            binary = "tofu"
            command_timeout_secs = 60
            search_path = "/opt/tools/bin"

            [worker]
            count = 2

            [store]
            backend = "postgres"

            [database]
            url = "postgres://db/keystone"

            [logging]
            format = "json"
            "#,
        )
        .expect("parse");

        assert_eq!(config.executor.binary, "tofu");
        assert_eq!(config.worker.count, 2);
        assert_eq!(config.worker.max_queue_size, 1000);
        assert_eq!(config.store.backend, StoreBackend::Postgres);
        assert_eq!(config.database.url, "postgres://db/keystone");
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.logging.format, LogFormat::Json);

        let executor = config.executor.to_executor_config();
        assert_eq!(executor.command_timeout, Duration::from_secs(60));
        assert_eq!(executor.search_path, Some(OsString::from("/opt/tools/bin")));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let result = toml::from_str::<EngineConfig>("[store]\nbackend = \"sqlite\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "[worker]\ncount = 3").expect("write");

        let path = file.path().to_str().expect("utf-8 path");
        let config = EngineConfig::from_file(path).expect("load");
        assert_eq!(config.worker.count, 3);
    }

    #[test]
    fn from_file_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "[worker]\ncount = \"many\"").expect("write");

        let path = file.path().to_str().expect("utf-8 path");
        let err = EngineConfig::from_file(path).expect_err("should fail");
        assert!(matches!(err, EngineError::Config(_)));
    }
}
