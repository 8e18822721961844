use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// Falls back to `~/.ncmcheck/data/ncmcheck.db` when unset.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl ClassifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Classifier calls in flight at once within a single batch.
    #[serde(default = "default_record_concurrency")]
    pub record_concurrency: usize,
}

fn default_record_concurrency() -> usize {
    4
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            record_concurrency: default_record_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_recover_interval_secs")]
    pub recover_interval_secs: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    /// Claims a batch may take before its remaining records are failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_lease_secs() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_recover_interval_secs() -> u64 {
    60
}

fn default_max_backoff_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

impl QueueConfig {
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn recover_interval(&self) -> Duration {
        Duration::from_secs(self.recover_interval_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_secs: default_lease_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            recover_interval_secs: default_recover_interval_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}
