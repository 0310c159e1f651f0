//! Configuration loader and validator for the batch-exchange sink.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub queue: Queue,
    pub jobstore: JobStore,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Cadence of the finalizer scheduler.
    pub poll_interval_ms: u64,
    /// Age after which a finalizer claim counts as abandoned.
    pub claim_timeout_seconds: u64,
    /// Max time since the last clean finalizer attempt before the
    /// liveness probe reports down.
    pub liveness_threshold_seconds: u64,
}

/// Inbound chunk-queue settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Queue {
    pub base_url: String,
    pub name: String,
    /// Consumer sleep when the queue answers empty.
    pub idle_sleep_ms: u64,
    /// Number of parallel consumer workers.
    pub workers: u32,
}

/// Job-authority settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobStore {
    pub base_url: String,
    pub timeout_seconds: u64,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }
    if cfg.app.claim_timeout_seconds == 0 {
        return Err(ConfigError::Invalid(
            "app.claim_timeout_seconds must be > 0",
        ));
    }
    if cfg.app.liveness_threshold_seconds == 0 {
        return Err(ConfigError::Invalid(
            "app.liveness_threshold_seconds must be > 0",
        ));
    }

    if cfg.queue.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("queue.base_url must be non-empty"));
    }
    // Url::join drops the last path segment of a slashless base.
    if !cfg.queue.base_url.ends_with('/') {
        return Err(ConfigError::Invalid("queue.base_url must end with '/'"));
    }
    if cfg.queue.name.trim().is_empty() {
        return Err(ConfigError::Invalid("queue.name must be non-empty"));
    }
    if cfg.queue.workers == 0 {
        return Err(ConfigError::Invalid("queue.workers must be > 0"));
    }

    if cfg.jobstore.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("jobstore.base_url must be non-empty"));
    }
    if !cfg.jobstore.base_url.ends_with('/') {
        return Err(ConfigError::Invalid("jobstore.base_url must end with '/'"));
    }
    if cfg.jobstore.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("jobstore.timeout_seconds must be > 0"));
    }

    Ok(())
}

/// Example YAML configuration, also used by tests.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_ms: 1000
  claim_timeout_seconds: 300
  liveness_threshold_seconds: 90

queue:
  base_url: "http://broker.local/"
  name: "sink::batch-exchange"
  idle_sleep_ms: 500
  workers: 2

jobstore:
  base_url: "http://jobstore.local/api/"
  timeout_seconds: 30
"#
}
