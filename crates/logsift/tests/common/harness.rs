//! Test harness for isolated test execution.
//!
//! The `TestHarness` owns a temporary directory holding the input files and
//! the SQLite database, plus a queue and result store opened on it.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use logsift::{
    CleanupHook, Config, Database, DeleteSourceFile, JobEventBroadcaster, JobQueue, LogProcessor,
    ResultStore, SqliteResultStore, StateCounts, WorkerPool,
};

use super::builders::ConfigBuilder;

pub struct TestHarness {
    /// Keeps the directory alive for the lifetime of the harness.
    temp_dir: TempDir,
    pub input_dir: PathBuf,
    pub config: Config,
    pub db: Database,
    pub queue: JobQueue,
    pub store: Arc<SqliteResultStore>,
    pub events: JobEventBroadcaster,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(ConfigBuilder::new().build())
    }

    /// Builds a harness around `config`. The database path is always placed
    /// inside the harness directory.
    pub fn with_config(mut config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let input_dir = temp_dir.path().join("input");
        std::fs::create_dir_all(&input_dir).expect("Failed to create input directory");

        let db_path = temp_dir.path().join("data").join("logsift.db");
        config.database_path = Some(db_path.clone());

        let db = Database::open(&db_path).expect("Failed to open database");
        let events = JobEventBroadcaster::new(1024);
        let queue = JobQueue::new(db.clone(), config.queue_config()).with_events(events.clone());
        let store = Arc::new(SqliteResultStore::new(db.clone()));

        Self {
            temp_dir,
            input_dir,
            config,
            db,
            queue,
            store,
            events,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.temp_dir.path().join("data").join("logsift.db")
    }

    /// Writes `content` to the input directory and returns its path.
    pub fn write_log(&self, name: &str, content: &str) -> String {
        let path = self.input_dir.join(name);
        std::fs::write(&path, content).expect("Failed to write log file");
        path.to_string_lossy().to_string()
    }

    /// Writes and enqueues a log file. Returns the job id.
    pub fn submit(&self, name: &str, content: &str) -> String {
        let file_ref = self.write_log(name, content);
        self.queue
            .enqueue(&file_ref, "test-user", name, content.len() as u64)
            .expect("Failed to enqueue")
    }

    /// Starts a pool wired the same way the `run` command wires it.
    pub fn start_pool(&self) -> WorkerPool {
        let processor = Arc::new(LogProcessor::new(
            &self.config.monitor_keywords,
            self.config.chunk_size_bytes,
        ));
        let cleanup: Option<Arc<dyn CleanupHook>> = if self.config.delete_files_after_processing {
            Some(Arc::new(DeleteSourceFile))
        } else {
            None
        };
        let store: Arc<dyn ResultStore> = self.store.clone();

        WorkerPool::start(
            self.queue.clone(),
            processor,
            store,
            cleanup,
            self.config.pool_settings(),
        )
        .expect("Failed to start worker pool")
    }

    /// Polls the queue until `done` holds or ten seconds pass. Returns the
    /// last counts seen.
    pub fn wait_for(&self, done: impl Fn(&StateCounts) -> bool) -> StateCounts {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let counts = self.queue.counts_by_state().expect("Failed to count jobs");
            if done(&counts) || Instant::now() > deadline {
                return counts;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Waits until nothing is waiting, active or delayed.
    pub fn drain(&self) -> StateCounts {
        self.wait_for(|c| c.total() > 0 && c.pending() == 0)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
