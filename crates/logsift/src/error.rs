use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LogsiftError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Result store error: {0}")]
    Store(#[from] StoreError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid value for environment variable '{name}': {reason}")]
    InvalidEnv { name: String, reason: String },
}

/// Failures that cross the processor boundary. Per-line parse anomalies
/// never surface here.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to open log source '{file_ref}': {source}")]
    OpenSource {
        file_ref: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read log source '{file_ref}': {source}")]
    ReadSource {
        file_ref: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to fetch remote log source '{url}': {reason}")]
    Remote { url: String, reason: String },

    #[error("Unsupported log source: {0}")]
    UnsupportedSource(String),
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue store unavailable: {0}")]
    QueueUnavailable(#[from] crate::db::DatabaseError),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Lease on job {job_id} (attempt {attempt}) is no longer held")]
    LeaseLost { job_id: String, attempt: u32 },

    #[error("Job {job_id} cannot go from '{from}' to '{to}'")]
    InvalidTransition {
        job_id: String,
        from: String,
        to: String,
    },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to persist stats for job {job_id}: {source}")]
    Persist {
        job_id: String,
        #[source]
        source: crate::db::DatabaseError,
    },

    #[error("Failed to query stats: {0}")]
    Query(#[from] crate::db::DatabaseError),

    #[error("Failed to encode stats record: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Failed to install signal handler: {0}")]
    SignalHandler(String),
}

pub type Result<T> = std::result::Result<T, LogsiftError>;
