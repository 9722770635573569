use std::path::{Path, PathBuf};

use crate::config::schema::{Config, CONFIG_VERSION};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

pub const ENV_WORKER_CONCURRENCY: &str = "WORKER_CONCURRENCY";
pub const ENV_MONITOR_KEYWORDS: &str = "MONITOR_KEYWORDS";
pub const ENV_DELETE_FILES: &str = "DELETE_FILES_AFTER_PROCESSING";
pub const ENV_DATABASE: &str = "LOGSIFT_DATABASE";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

/// Loads `path` when given (defaults otherwise), then applies environment
/// overrides and validates the result.
pub fn load_effective_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    apply_env_overrides(&mut config)?;
    validate_config(&config)?;
    Ok(config)
}

/// Applies the deployment environment variables on top of `config`.
///
/// `MONITOR_KEYWORDS` is comma separated. `DELETE_FILES_AFTER_PROCESSING`
/// enables cleanup only when exactly `true`.
pub fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    if let Ok(value) = std::env::var(ENV_WORKER_CONCURRENCY) {
        config.worker_concurrency =
            value
                .trim()
                .parse::<usize>()
                .map_err(|e| ConfigError::InvalidEnv {
                    name: ENV_WORKER_CONCURRENCY.to_string(),
                    reason: e.to_string(),
                })?;
    }

    if let Ok(value) = std::env::var(ENV_MONITOR_KEYWORDS) {
        config.monitor_keywords = value
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(String::from)
            .collect();
    }

    if let Ok(value) = std::env::var(ENV_DELETE_FILES) {
        config.delete_files_after_processing = value == "true";
    }

    if let Ok(value) = std::env::var(ENV_DATABASE) {
        if !value.trim().is_empty() {
            config.database_path = Some(PathBuf::from(value));
        }
    }

    Ok(())
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != CONFIG_VERSION {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.worker_concurrency == 0 {
        return Err(ConfigError::Validation {
            message: "worker_concurrency must be at least 1".to_string(),
        });
    }

    if config.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "max_attempts must be at least 1".to_string(),
        });
    }

    if config.chunk_size_bytes == 0 {
        return Err(ConfigError::Validation {
            message: "chunk_size_bytes must be at least 1".to_string(),
        });
    }

    if config.visibility_timeout_ms == 0 || config.poll_interval_ms == 0 {
        return Err(ConfigError::Validation {
            message: "visibility_timeout_ms and poll_interval_ms must be positive".to_string(),
        });
    }

    if config.monitor_keywords.iter().any(|k| k.is_empty()) {
        return Err(ConfigError::Validation {
            message: "monitor_keywords must not contain empty strings".to_string(),
        });
    }

    Ok(())
}
