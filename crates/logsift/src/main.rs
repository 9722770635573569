use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{info, warn};
use serde_json::json;

use logsift::config::load_effective_config;
use logsift::logging::{default_log_format, init_logging, LogFormat};
use logsift::processor::LogSource;
use logsift::{
    CleanupHook, Config, Database, DeleteSourceFile, JobEventBroadcaster, JobEventKind, JobQueue,
    LogProcessor, LogsiftError, ProcessError, ResultStore, SqliteResultStore, WorkerError,
    WorkerPool,
};

/// Queue size assumed for remote files whose length the server does not
/// report (priority 6).
const UNKNOWN_REMOTE_SIZE: u64 = 1_000_000;

#[derive(Parser, Debug)]
#[command(
    name = "logsift",
    version,
    about = "Queue log files and aggregate their statistics with a pool of workers"
)]
struct Cli {
    /// Path to a JSON config file (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format (pretty on a terminal, json otherwise)
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the worker pool until interrupted
    Run,

    /// Enqueue log files for processing
    ///
    /// Smaller files are processed first. Remote files are sized with a HEAD
    /// request; when the server reports no Content-Length they are queued as
    /// 1 MB.
    Submit {
        /// File paths or http(s)/file URLs
        #[arg(required = true)]
        files: Vec<String>,

        /// Owner recorded with each job
        #[arg(long, default_value = "local")]
        user: String,
    },

    /// Print job counts per state
    Status,

    /// Print stored results, newest first, or a single job's result
    Stats {
        job_id: Option<String>,

        #[arg(long)]
        user: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: u64,
    },

    /// Cancel a job that has not started yet
    Cancel { job_id: String },

    /// Delete finished jobs older than the given age
    Purge {
        #[arg(long, default_value_t = 24)]
        older_than_hours: u64,
    },
}

fn main() {
    let cli = Cli::parse();

    let format = cli.log_format.unwrap_or_else(default_log_format);
    if let Err(e) = init_logging(format) {
        eprintln!("logging setup failed: {e}");
    }

    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), LogsiftError> {
    let config = load_effective_config(cli.config.as_deref())?;
    let db = Database::open(&config.resolved_database_path()?)?;

    match cli.command {
        Command::Run => run_pool(&config, db),
        Command::Submit { files, user } => submit(&config, db, &files, &user),
        Command::Status => {
            let queue = JobQueue::new(db, config.queue_config());
            print_json(&queue.counts_by_state()?);
            Ok(())
        }
        Command::Stats {
            job_id,
            user,
            limit,
        } => {
            let store = SqliteResultStore::new(db);
            match job_id {
                Some(job_id) => match store.find(&job_id)? {
                    Some(record) => print_json(&record),
                    None => print_json(&json!({ "error": "Stats not found", "job_id": job_id })),
                },
                None => print_json(&store.list(user.as_deref(), limit)?),
            }
            Ok(())
        }
        Command::Cancel { job_id } => {
            let queue = JobQueue::new(db, config.queue_config());
            let removed = queue.remove(&job_id)?;
            print_json(&json!({ "job_id": job_id, "removed": removed }));
            Ok(())
        }
        Command::Purge { older_than_hours } => {
            let queue = JobQueue::new(db, config.queue_config());
            let purged =
                queue.purge_finished(Duration::from_secs(older_than_hours.saturating_mul(3600)))?;
            print_json(&json!({ "purged": purged }));
            Ok(())
        }
    }
}

fn run_pool(config: &Config, db: Database) -> Result<(), LogsiftError> {
    let events = JobEventBroadcaster::default();
    let observers = vec![
        events.on(JobEventKind::Completed, |event| {
            info!(
                "Job {} ({}) completed after {} attempt(s)",
                event.job_id, event.file_name, event.attempts
            );
        }),
        events.on(JobEventKind::Failed, |event| {
            warn!(
                "Job {} ({}) failed: {}",
                event.job_id,
                event.file_name,
                event.error.as_deref().unwrap_or("unknown error")
            );
        }),
    ];

    let queue = JobQueue::new(db.clone(), config.queue_config()).with_events(events);
    let store: Arc<dyn ResultStore> = Arc::new(SqliteResultStore::new(db));
    let processor = Arc::new(LogProcessor::new(
        &config.monitor_keywords,
        config.chunk_size_bytes,
    ));
    let cleanup: Option<Arc<dyn CleanupHook>> = if config.delete_files_after_processing {
        Some(Arc::new(DeleteSourceFile))
    } else {
        None
    };

    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .map_err(|e| WorkerError::SignalHandler(e.to_string()))?;

    let pool = WorkerPool::start(
        queue.clone(),
        processor,
        store,
        cleanup,
        config.pool_settings(),
    )?;
    info!(
        "Processing with {} workers; press Ctrl-C to stop",
        pool.concurrency()
    );

    let _ = stop_rx.recv();
    pool.shutdown();
    pool.wait();

    drop(queue);
    for observer in observers {
        let _ = observer.join();
    }
    Ok(())
}

fn submit(config: &Config, db: Database, files: &[String], user: &str) -> Result<(), LogsiftError> {
    let queue = JobQueue::new(db, config.queue_config());
    let mut submitted = Vec::with_capacity(files.len());

    for file_ref in files {
        let source = LogSource::parse(file_ref)?;
        let (file_ref, size_bytes) = match source.local_path() {
            Some(path) => {
                let path = absolute(path)?;
                let size = LogSource::File(path.clone()).size_hint()?.unwrap_or(0);
                (path.to_string_lossy().to_string(), size)
            }
            None => (file_ref.clone(), remote_size(&source)),
        };

        let file_name = file_ref
            .rsplit(['/', '\\'])
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("unknown")
            .to_string();

        let job_id = queue.enqueue(&file_ref, user, &file_name, size_bytes)?;
        submitted.push(json!({
            "job_id": job_id,
            "file_name": file_name,
            "size_bytes": size_bytes,
        }));
    }

    print_json(&submitted);
    Ok(())
}

/// Size used for ordering a remote file. Unknown sizes queue as if
/// [`UNKNOWN_REMOTE_SIZE`] bytes.
fn remote_size(source: &LogSource) -> u64 {
    match source.size_hint() {
        Ok(Some(size)) => size,
        Ok(None) => {
            warn!(
                "{} sent no Content-Length; queueing as {} bytes",
                source, UNKNOWN_REMOTE_SIZE
            );
            UNKNOWN_REMOTE_SIZE
        }
        Err(e) => {
            warn!("Could not size {}: {}; queueing as {} bytes", source, e, UNKNOWN_REMOTE_SIZE);
            UNKNOWN_REMOTE_SIZE
        }
    }
}

fn absolute(path: &Path) -> Result<PathBuf, ProcessError> {
    std::path::absolute(path).map_err(|e| ProcessError::OpenSource {
        file_ref: path.display().to_string(),
        source: e,
    })
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("failed to encode output: {e}"),
    }
}
