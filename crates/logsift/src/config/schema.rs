use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::processor::DEFAULT_CHUNK_SIZE;
use crate::queue::{QueueConfig, RetryPolicy};
use crate::worker::PoolSettings;

pub const CONFIG_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default)]
    pub monitor_keywords: Vec<String>,
    #[serde(default = "default_chunk_size_bytes")]
    pub chunk_size_bytes: usize,
    #[serde(default = "default_visibility_timeout_ms")]
    pub visibility_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub delete_files_after_processing: bool,
    /// Defaults to `~/.logsift/data/logsift.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

fn default_version() -> String {
    CONFIG_VERSION.to_string()
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    1000
}

fn default_chunk_size_bytes() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_visibility_timeout_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            worker_concurrency: default_worker_concurrency(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            monitor_keywords: Vec::new(),
            chunk_size_bytes: default_chunk_size_bytes(),
            visibility_timeout_ms: default_visibility_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            delete_files_after_processing: false,
            database_path: None,
        }
    }
}

impl Config {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_backoff_ms),
        )
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            retry: self.retry_policy(),
            visibility_timeout: Duration::from_millis(self.visibility_timeout_ms),
        }
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            concurrency: self.worker_concurrency,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    /// The configured database path, or the per-user default.
    pub fn resolved_database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => crate::db::default_database_path().ok_or_else(|| ConfigError::Validation {
                message: "No database_path configured and no home directory found".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.worker_concurrency, 4);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_backoff_ms, 1000);
        assert!(config.monitor_keywords.is_empty());
        assert_eq!(config.chunk_size_bytes, 65536);
        assert!(!config.delete_files_after_processing);
    }

    #[test]
    fn test_empty_object_matches_default() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_derived_settings() {
        let config = Config {
            max_attempts: 5,
            base_backoff_ms: 250,
            visibility_timeout_ms: 1000,
            worker_concurrency: 2,
            poll_interval_ms: 50,
            ..Config::default()
        };

        let queue = config.queue_config();
        assert_eq!(queue.retry.max_attempts, 5);
        assert_eq!(queue.retry.base_delay, Duration::from_millis(250));
        assert_eq!(queue.visibility_timeout, Duration::from_secs(1));

        let pool = config.pool_settings();
        assert_eq!(pool.concurrency, 2);
        assert_eq!(pool.poll_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_explicit_database_path() {
        let config = Config {
            database_path: Some(PathBuf::from("/tmp/q.db")),
            ..Config::default()
        };
        assert_eq!(
            config.resolved_database_path().unwrap(),
            PathBuf::from("/tmp/q.db")
        );
    }
}
