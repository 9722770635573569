//! Job state-transition events for external observers.
//!
//! The queue emits an event for every transition it performs. Nothing in
//! the pipeline waits on a subscriber; sending with no receivers is fine.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::queue::{Job, JobState};

/// Kind of transition an event reports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    /// Job was enqueued.
    Waiting,
    /// A worker leased the job.
    Active,
    Completed,
    /// A failed attempt was scheduled for retry.
    Delayed,
    /// The job failed terminally.
    Failed,
}

impl From<JobState> for JobEventKind {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Waiting => JobEventKind::Waiting,
            JobState::Active => JobEventKind::Active,
            JobState::Completed => JobEventKind::Completed,
            JobState::Delayed => JobEventKind::Delayed,
            JobState::Failed => JobEventKind::Failed,
        }
    }
}

impl std::fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobEventKind::Waiting => "waiting",
            JobEventKind::Active => "active",
            JobEventKind::Completed => "completed",
            JobEventKind::Delayed => "delayed",
            JobEventKind::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A single job state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: String,
    pub kind: JobEventKind,
    /// Attempts made so far, including the current one.
    pub attempts: u32,
    pub file_name: String,
    pub user_id: String,
    /// Error message (set on delayed and failed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When a delayed job becomes eligible again.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_at: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    /// Builds an event describing `job` as it is now.
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            kind: job.state.into(),
            attempts: job.attempts,
            file_name: job.file_name.clone(),
            user_id: job.user_id.clone(),
            error: match job.state {
                JobState::Delayed | JobState::Failed => job.error.clone(),
                _ => None,
            },
            retry_at: match job.state {
                JobState::Delayed => job.run_at,
                _ => None,
            },
            timestamp: Utc::now(),
        }
    }
}

/// Broadcasts job events to any number of subscribers.
#[derive(Clone)]
pub struct JobEventBroadcaster {
    sender: Arc<broadcast::Sender<JobEvent>>,
}

impl JobEventBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends an event to all subscribers.
    pub fn send(&self, event: JobEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for job events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    /// Runs `handler` on a dedicated thread for every event of `kind`.
    ///
    /// The thread ends once every broadcaster clone has been dropped. A
    /// handler that falls behind by more than the channel capacity skips
    /// the missed events.
    pub fn on<F>(&self, kind: JobEventKind, handler: F) -> JoinHandle<()>
    where
        F: Fn(&JobEvent) + Send + 'static,
    {
        let mut receiver = self.sender.subscribe();
        thread::spawn(move || loop {
            match receiver.blocking_recv() {
                Ok(event) if event.kind == kind => handler(&event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("'{}' event handler lagged, skipped {} events", kind, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        })
    }
}

impl Default for JobEventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
