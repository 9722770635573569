use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tracing::info_span;

use crate::error::{QueueError, WorkerError};
use crate::processor::{LogProcessor, ProgressEvent, ProgressReporter};
use crate::queue::{Job, JobQueue, JobState};
use crate::store::{failure_metadata, RecordStatus, ResultStore, StatsRecord};
use crate::worker::cleanup::CleanupHook;

pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub concurrency: usize,
    /// Longest an idle worker sleeps before checking the queue again.
    pub poll_interval: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Everything a worker needs, shared by all workers of a pool.
#[derive(Clone)]
struct WorkerContext {
    queue: JobQueue,
    processor: Arc<LogProcessor>,
    store: Arc<dyn ResultStore>,
    cleanup: Option<Arc<dyn CleanupHook>>,
    poll_interval: Duration,
}

/// Fixed set of worker threads leasing jobs from a [`JobQueue`].
pub struct WorkerPool {
    queue: JobQueue,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawns `settings.concurrency` workers that run until [`shutdown`].
    ///
    /// [`shutdown`]: WorkerPool::shutdown
    pub fn start(
        queue: JobQueue,
        processor: Arc<LogProcessor>,
        store: Arc<dyn ResultStore>,
        cleanup: Option<Arc<dyn CleanupHook>>,
        settings: PoolSettings,
    ) -> Result<Self, WorkerError> {
        if settings.concurrency == 0 {
            return Err(WorkerError::SpawnFailed(
                "concurrency must be greater than 0".to_string(),
            ));
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let context = WorkerContext {
            queue: queue.clone(),
            processor,
            store,
            cleanup,
            poll_interval: settings.poll_interval,
        };

        let mut workers = Vec::with_capacity(settings.concurrency);
        for worker_id in 0..settings.concurrency {
            let context = context.clone();
            let shutdown_flag = Arc::clone(&shutdown);

            let spawned = thread::Builder::new()
                .name(format!("logsift-worker-{}", worker_id))
                .spawn(move || run_worker(worker_id, context, shutdown_flag));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Stop whatever already started before reporting.
                    shutdown.store(true, Ordering::Relaxed);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(WorkerError::SpawnFailed(e.to_string()));
                }
            }
        }

        info!("Started {} workers", settings.concurrency);

        Ok(Self {
            queue,
            workers,
            shutdown,
        })
    }

    /// Asks every worker to stop after its current job.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
        for _ in 0..self.workers.len() {
            self.queue.notify();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub fn concurrency(&self) -> usize {
        self.workers.len()
    }

    /// Blocks until every worker has exited. Call [`WorkerPool::shutdown`]
    /// first or this waits forever.
    pub fn wait(self) {
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }
}

fn run_worker(worker_id: usize, context: WorkerContext, shutdown: Arc<AtomicBool>) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match context.queue.lease() {
            Ok(Some(job)) => context.execute(worker_id, job),
            Ok(None) => {
                context.queue.wait_for_work(context.poll_interval);
            }
            Err(e) => {
                error!("Worker {} failed to lease a job: {}", worker_id, e);
                thread::sleep(context.poll_interval);
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

impl WorkerContext {
    fn execute(&self, worker_id: usize, job: Job) {
        let span = info_span!(
            "job",
            job_id = %job.id,
            file = %job.file_name,
            attempt = job.attempts,
            worker = worker_id
        );
        let _enter = span.enter();

        debug!(
            "Worker {} processing job {} ({})",
            worker_id, job.id, job.file_ref
        );

        let keeper = LeaseKeeper::new(&self.queue, &job);
        let processed = self.processor.process(&job.file_ref, &keeper);

        // Another worker owns the job now; its result is the one that counts.
        if !keeper.still_held() {
            warn!(
                "Dropping result of job {} attempt {}: lease was lost",
                job.id, job.attempts
            );
            return;
        }

        let outcome = processed.map_err(|e| e.to_string()).and_then(|stats| {
            let record = StatsRecord::completed(&job, stats);
            self.store.save(&record).map_err(|e| e.to_string())
        });

        match outcome {
            Ok(()) => match self.queue.ack(&job.id, job.attempts) {
                Ok(()) => self.run_cleanup(&job),
                Err(QueueError::LeaseLost { .. }) => {
                    warn!("Job {} was leased again before its ack", job.id)
                }
                Err(e) => error!("Failed to ack job {}: {}", job.id, e),
            },
            Err(reason) => {
                let metadata = failure_metadata(&reason, job.attempts);
                if let Err(e) = self.store.update(&job.id, RecordStatus::Failed, &metadata) {
                    warn!("Failed to record failure of job {}: {}", job.id, e);
                }

                match self.queue.nack(&job.id, job.attempts, &reason) {
                    Ok(JobState::Failed) => self.run_cleanup(&job),
                    Ok(_) => {}
                    Err(QueueError::LeaseLost { .. }) => {
                        warn!("Job {} was leased again before its nack", job.id)
                    }
                    Err(e) => error!("Failed to nack job {}: {}", job.id, e),
                }
            }
        }
    }

    fn run_cleanup(&self, job: &Job) {
        if let Some(hook) = &self.cleanup {
            if let Err(e) = hook.cleanup(job) {
                warn!("Cleanup for job {} failed: {}", job.id, e);
            }
        }
    }
}

/// Renews a job's lease while its file is still being read, so long files
/// are not handed to a second worker.
struct LeaseKeeper<'a> {
    queue: &'a JobQueue,
    job_id: &'a str,
    attempt: u32,
    renew_every: Duration,
    last_renewal: Mutex<Instant>,
    lost: AtomicBool,
}

impl<'a> LeaseKeeper<'a> {
    fn new(queue: &'a JobQueue, job: &'a Job) -> Self {
        Self {
            queue,
            job_id: &job.id,
            attempt: job.attempts,
            renew_every: queue.config().visibility_timeout / 3,
            last_renewal: Mutex::new(Instant::now()),
            lost: AtomicBool::new(false),
        }
    }

    /// Renews the lease once more before results are written. Returns
    /// `false` when it was lost during processing or is lost now.
    ///
    /// A queue error counts as held: the fenced ack or nack still rejects
    /// a stale holder.
    fn still_held(&self) -> bool {
        if self.lost.load(Ordering::Relaxed) {
            return false;
        }
        match self.queue.extend_lease(self.job_id, self.attempt) {
            Ok(held) => held,
            Err(e) => {
                warn!("Failed to confirm lease of job {}: {}", self.job_id, e);
                true
            }
        }
    }
}

impl ProgressReporter for LeaseKeeper<'_> {
    fn report(&self, event: ProgressEvent) {
        let ProgressEvent::Chunk { bytes_read, .. } = event;
        if self.lost.load(Ordering::Relaxed) {
            return;
        }

        let Ok(mut last) = self.last_renewal.lock() else {
            return;
        };
        if last.elapsed() < self.renew_every {
            return;
        }
        *last = Instant::now();

        match self.queue.extend_lease(self.job_id, self.attempt) {
            Ok(true) => debug!("Renewed lease of job {} at {} bytes", self.job_id, bytes_read),
            Ok(false) => {
                warn!(
                    "Lease of job {} was lost; another worker may run it too",
                    self.job_id
                );
                self.lost.store(true, Ordering::Relaxed);
            }
            Err(e) => warn!("Failed to renew lease of job {}: {}", self.job_id, e),
        }
    }
}
