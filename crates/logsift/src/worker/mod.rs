pub mod cleanup;
pub mod pool;

pub use cleanup::{CleanupHook, DeleteSourceFile};
pub use pool::{PoolSettings, WorkerPool, DEFAULT_CONCURRENCY, DEFAULT_POLL_INTERVAL};
