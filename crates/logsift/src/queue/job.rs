use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::job_repo::JobRow;
use crate::db::DatabaseError;

/// Lifecycle state of a queued job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    /// Scheduled for retry once its backoff elapses.
    Delayed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Delayed => "delayed",
        }
    }

    /// `completed` and `failed` are never left once entered.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "delayed" => Ok(JobState::Delayed),
            other => Err(format!("unknown job state '{}'", other)),
        }
    }
}

/// One unit of queued work tied to a single uploaded log file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    /// Path or URL the processor opens as a byte stream.
    pub file_ref: String,
    pub user_id: String,
    pub file_name: String,
    pub size_bytes: u64,
    /// Lower is served first.
    pub priority: u32,
    pub state: JobState,
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Whether another failure would still be retried.
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

impl TryFrom<JobRow> for Job {
    type Error = DatabaseError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let state = row
            .state
            .parse::<JobState>()
            .map_err(|reason| DatabaseError::Corrupt {
                column: "state",
                reason,
            })?;

        Ok(Self {
            id: row.id,
            file_ref: row.file_ref,
            user_id: row.user_id,
            file_name: row.file_name,
            size_bytes: row.size_bytes.max(0) as u64,
            priority: row.priority.max(0) as u32,
            state,
            attempts: row.attempts.max(0) as u32,
            max_attempts: row.max_attempts.max(0) as u32,
            error: row.error,
            enqueued_at: from_millis(row.enqueued_at),
            run_at: row.run_at.map(from_millis),
            lease_expires_at: row.lease_expires_at.map(from_millis),
            finished_at: row.finished_at.map(from_millis),
        })
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Computes the scheduling priority for a file: `ceil(log10(size))`, never
/// negative. Sizes 0 and 1 map to 0.
///
/// Integer arithmetic keeps exact powers of ten on the right bucket.
pub fn priority_for_size(size_bytes: u64) -> u32 {
    let mut priority = 0;
    let mut bound: u64 = 1;
    while bound < size_bytes {
        bound = bound.saturating_mul(10);
        priority += 1;
    }
    priority
}

/// Point-in-time number of jobs per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

impl StateCounts {
    pub fn add(&mut self, state: JobState, count: u64) {
        match state {
            JobState::Waiting => self.waiting += count,
            JobState::Active => self.active += count,
            JobState::Completed => self.completed += count,
            JobState::Failed => self.failed += count,
            JobState::Delayed => self.delayed += count,
        }
    }

    /// Jobs that still need a worker (waiting, active or delayed).
    pub fn pending(&self) -> u64 {
        self.waiting + self.active + self.delayed
    }

    pub fn total(&self) -> u64 {
        self.pending() + self.completed + self.failed
    }
}
