pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod processor;
pub mod queue;
pub mod store;
pub mod worker;

pub use broadcast::{JobEvent, JobEventBroadcaster, JobEventKind};
pub use config::{load_config, load_effective_config, Config};
pub use db::Database;
pub use error::{
    ConfigError, LogsiftError, ProcessError, QueueError, Result, StoreError, WorkerError,
};
pub use processor::{parse_log_entry, LogEntry, LogProcessor, LogStats};
pub use queue::{priority_for_size, Job, JobQueue, JobState, QueueConfig, RetryPolicy, StateCounts};
pub use store::{RecordStatus, ResultStore, SqliteResultStore, StatsRecord};
pub use worker::{CleanupHook, DeleteSourceFile, PoolSettings, WorkerPool};
