//! Durable job queue with priority ordering, leases and bounded retries.
//!
//! All state lives in the `jobs` table. Every transition runs inside one
//! immediate transaction, so a job is leased by at most one caller at a
//! time even across processes sharing the database file.

pub mod job;
pub mod retry;

use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, info, warn};
use rusqlite::Connection;

use crate::broadcast::{JobEvent, JobEventBroadcaster};
use crate::db::job_repo::{self, NewJobRow};
use crate::db::{Database, DatabaseError};
use crate::error::QueueError;

pub use job::{priority_for_size, Job, JobState, StateCounts};
pub use retry::RetryPolicy;

pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Queue-wide settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub retry: RetryPolicy,
    /// How long a lease stays valid without an ack, nack or renewal.
    pub visibility_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        }
    }
}

/// Handle to the job queue. Clones share the same store and wake-up
/// channel.
#[derive(Clone)]
pub struct JobQueue {
    db: Database,
    config: QueueConfig,
    events: Option<JobEventBroadcaster>,
    doorbell_tx: Sender<()>,
    doorbell_rx: Receiver<()>,
}

impl JobQueue {
    pub fn new(db: Database, config: QueueConfig) -> Self {
        let (doorbell_tx, doorbell_rx) = bounded(1024);
        Self {
            db,
            config,
            events: None,
            doorbell_tx,
            doorbell_rx,
        }
    }

    /// Attaches an event broadcaster that receives every state transition.
    pub fn with_events(mut self, events: JobEventBroadcaster) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn events(&self) -> Option<&JobEventBroadcaster> {
        self.events.as_ref()
    }

    /// Adds a job for `file_ref` and returns its id.
    pub fn enqueue(
        &self,
        file_ref: &str,
        user_id: &str,
        file_name: &str,
        size_bytes: u64,
    ) -> Result<String, QueueError> {
        let id = uuid::Uuid::new_v4().to_string();
        let priority = priority_for_size(size_bytes);
        let now = now_ms();

        let job = self.db.with_tx(|tx| -> Result<Job, QueueError> {
            job_repo::insert(
                tx,
                &NewJobRow {
                    id: &id,
                    file_ref,
                    user_id,
                    file_name,
                    size_bytes: i64::try_from(size_bytes).unwrap_or(i64::MAX),
                    priority: i64::from(priority),
                    max_attempts: i64::from(self.config.retry.max_attempts),
                    enqueued_at: now,
                },
            )?;
            load(tx, &id)
        })?;

        info!(
            "Enqueued job {} for '{}' ({} bytes, priority {})",
            id, file_name, size_bytes, priority
        );
        self.emit(&job);
        self.notify();
        Ok(id)
    }

    /// Claims the next eligible job, or `None` when nothing is ready.
    pub fn lease(&self) -> Result<Option<Job>, QueueError> {
        self.lease_at(now_ms())
    }

    fn lease_at(&self, now: i64) -> Result<Option<Job>, QueueError> {
        let lease_until = now.saturating_add(millis(self.config.visibility_timeout));

        let (expired, leased) = self.db.with_tx(|tx| -> Result<_, QueueError> {
            let expired = reconcile(tx, now)?;
            let leased = match job_repo::lease_next(tx, lease_until)? {
                Some(row) => Some(Job::try_from(row)?),
                None => None,
            };
            Ok((expired, leased))
        })?;

        self.emit_all(&expired);
        if let Some(job) = &leased {
            debug!(
                "Leased job {} (attempt {}/{})",
                job.id, job.attempts, job.max_attempts
            );
            self.emit(job);
        }
        Ok(leased)
    }

    /// Marks the job leased as `attempt` completed. Acking a completed job
    /// is a no-op.
    ///
    /// `attempt` is the `attempts` value returned by [`JobQueue::lease`].
    /// Once the job has been leased again, the old holder gets
    /// [`QueueError::LeaseLost`] and the job is left untouched.
    pub fn ack(&self, job_id: &str, attempt: u32) -> Result<(), QueueError> {
        self.ack_at(job_id, attempt, now_ms())
    }

    fn ack_at(&self, job_id: &str, attempt: u32, now: i64) -> Result<(), QueueError> {
        let completed = self.db.with_tx(|tx| -> Result<Option<Job>, QueueError> {
            let job = load(tx, job_id)?;
            if job.state == JobState::Completed {
                return Ok(None);
            }
            if job.attempts != attempt {
                return Err(lease_lost(job_id, attempt));
            }
            match job.state {
                JobState::Failed | JobState::Delayed => {
                    return Err(QueueError::InvalidTransition {
                        job_id: job_id.to_string(),
                        from: job.state.to_string(),
                        to: JobState::Completed.to_string(),
                    })
                }
                JobState::Waiting => warn!(
                    "Job {} acked while waiting; its lease had expired",
                    job_id
                ),
                JobState::Active | JobState::Completed => {}
            }

            if !job_repo::mark_completed(tx, job_id, i64::from(attempt), now)? {
                return Err(lease_lost(job_id, attempt));
            }
            Ok(Some(load(tx, job_id)?))
        })?;

        match completed {
            Some(job) => {
                info!("Job {} completed after {} attempt(s)", job.id, job.attempts);
                self.emit(&job);
            }
            None => debug!("Job {} already completed; ack ignored", job_id),
        }
        Ok(())
    }

    /// Reports a failed attempt. Returns the resulting state: `delayed` when
    /// a retry was scheduled, `failed` once attempts are exhausted.
    ///
    /// Fenced by `attempt` like [`JobQueue::ack`]. A nack on a job that is
    /// already finished, or already nacked for this attempt, changes nothing
    /// and returns the current state.
    pub fn nack(&self, job_id: &str, attempt: u32, error: &str) -> Result<JobState, QueueError> {
        self.nack_at(job_id, attempt, error, now_ms())
    }

    fn nack_at(
        &self,
        job_id: &str,
        attempt: u32,
        error: &str,
        now: i64,
    ) -> Result<JobState, QueueError> {
        let retry = self.config.retry;

        let (job, changed) = self.db.with_tx(|tx| -> Result<(Job, bool), QueueError> {
            let job = load(tx, job_id)?;
            if job.state.is_terminal()
                || (job.state == JobState::Delayed && job.attempts == attempt)
            {
                return Ok((job, false));
            }

            if job.attempts != attempt {
                return Err(lease_lost(job_id, attempt));
            }

            let fenced = i64::from(attempt);
            let marked = if job.has_attempts_left() {
                let delay = millis(retry.backoff_delay(job.attempts));
                job_repo::mark_delayed(tx, job_id, fenced, now.saturating_add(delay), error)?
            } else {
                job_repo::mark_failed(tx, job_id, fenced, now, error)?
            };
            if !marked {
                return Err(lease_lost(job_id, attempt));
            }
            Ok((load(tx, job_id)?, true))
        })?;

        if !changed {
            warn!(
                "Job {} is already {}; nack ignored ({})",
                job_id, job.state, error
            );
            return Ok(job.state);
        }

        match job.state {
            JobState::Delayed => warn!(
                "Job {} attempt {}/{} failed, retrying at {}: {}",
                job.id,
                job.attempts,
                job.max_attempts,
                job.run_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
                error
            ),
            _ => log::error!(
                "Job {} failed permanently after {} attempt(s): {}",
                job.id,
                job.attempts,
                error
            ),
        }
        self.emit(&job);
        self.notify();
        Ok(job.state)
    }

    /// Pushes the visibility deadline of the lease `attempt` forward by one
    /// timeout. Returns `false` when that lease is no longer held.
    pub fn extend_lease(&self, job_id: &str, attempt: u32) -> Result<bool, QueueError> {
        let lease_until = now_ms().saturating_add(millis(self.config.visibility_timeout));
        let extended = self.db.with_conn(|conn| {
            job_repo::extend_lease(conn, job_id, i64::from(attempt), lease_until)
        })?;
        Ok(extended)
    }

    /// Point-in-time snapshot of how many jobs sit in each state.
    pub fn counts_by_state(&self) -> Result<StateCounts, QueueError> {
        let now = now_ms();
        let (expired, rows) = self.db.with_tx(|tx| -> Result<_, QueueError> {
            let expired = reconcile(tx, now)?;
            Ok((expired, job_repo::count_by_state(tx)?))
        })?;
        self.emit_all(&expired);

        let mut counts = StateCounts::default();
        for (state, count) in rows {
            let state = state
                .parse::<JobState>()
                .map_err(|reason| DatabaseError::Corrupt {
                    column: "state",
                    reason,
                })?;
            counts.add(state, count);
        }
        Ok(counts)
    }

    /// Looks up a job by id.
    pub fn get(&self, job_id: &str) -> Result<Option<Job>, QueueError> {
        let row = self.db.with_conn(|conn| job_repo::find_by_id(conn, job_id))?;
        Ok(row.map(Job::try_from).transpose()?)
    }

    /// Best-effort cancellation: deletes the job if it has not started.
    /// Active and finished jobs are kept; returns whether a job was removed.
    pub fn remove(&self, job_id: &str) -> Result<bool, QueueError> {
        let removed = self
            .db
            .with_conn(|conn| job_repo::delete_pending(conn, job_id))?;
        if removed {
            info!("Removed pending job {}", job_id);
        }
        Ok(removed)
    }

    /// Deletes completed and failed jobs that finished more than
    /// `older_than` ago.
    pub fn purge_finished(&self, older_than: Duration) -> Result<usize, QueueError> {
        let before = now_ms().saturating_sub(millis(older_than));
        let purged = self
            .db
            .with_conn(|conn| job_repo::purge_finished(conn, before))?;
        if purged > 0 {
            info!("Purged {} finished job(s)", purged);
        }
        Ok(purged)
    }

    /// Blocks until new work may be available or `timeout` elapses.
    ///
    /// The wait is shortened so a worker wakes when the earliest delayed
    /// job becomes due. Returns `true` when woken by a notification.
    pub fn wait_for_work(&self, timeout: Duration) -> bool {
        let timeout = match self.next_due_in() {
            Some(due) => timeout.min(due),
            None => timeout,
        };
        self.doorbell_rx.recv_timeout(timeout).is_ok()
    }

    fn next_due_in(&self) -> Option<Duration> {
        match self.db.with_conn(job_repo::next_run_at) {
            Ok(Some(run_at)) => {
                let wait = run_at.saturating_sub(now_ms()).max(0);
                Some(Duration::from_millis(wait as u64))
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to read next retry time: {}", e);
                None
            }
        }
    }

    /// Wakes one worker blocked in [`JobQueue::wait_for_work`].
    pub fn notify(&self) {
        // A full doorbell already guarantees a wake-up.
        let _ = self.doorbell_tx.try_send(());
    }

    fn emit(&self, job: &Job) {
        if let Some(events) = &self.events {
            events.send(JobEvent::from_job(job));
        }
    }

    fn emit_all(&self, jobs: &[Job]) {
        for job in jobs {
            self.emit(job);
        }
    }
}

/// Promotes due retries and expires stale leases. Returns the jobs whose
/// lease expired, as they are now (`waiting` or `failed`).
fn reconcile(conn: &Connection, now: i64) -> Result<Vec<Job>, QueueError> {
    let promoted = job_repo::promote_due(conn, now)?;
    if promoted > 0 {
        debug!("Promoted {} delayed job(s) to waiting", promoted);
    }

    let expired = job_repo::expire_leases(conn, now)?;
    for id in &expired.reverted {
        warn!("Lease of job {} expired without ack; job returned to waiting", id);
    }
    for id in &expired.failed {
        warn!("Job {} failed: lease expired on its last attempt", id);
    }

    expired
        .reverted
        .iter()
        .chain(&expired.failed)
        .map(|id| load(conn, id))
        .collect()
}

fn lease_lost(job_id: &str, attempt: u32) -> QueueError {
    QueueError::LeaseLost {
        job_id: job_id.to_string(),
        attempt,
    }
}

fn load(conn: &Connection, job_id: &str) -> Result<Job, QueueError> {
    let row = job_repo::find_by_id(conn, job_id)?
        .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
    Ok(Job::try_from(row)?)
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
