//! Persistence of per-job processing results.

pub mod sqlite;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::StoreError;
use crate::processor::LogStats;
use crate::queue::Job;

pub use sqlite::SqliteResultStore;

/// Metadata key holding the source the stats were computed from.
pub const META_ORIGINAL_FILE_PATH: &str = "original_file_path";
/// Metadata key holding the error of a failed job.
pub const META_ERROR: &str = "error";
/// Metadata key holding the attempt count at the time of writing.
pub const META_ATTEMPTS: &str = "attempts";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Completed,
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Completed => "completed",
            RecordStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(RecordStatus::Completed),
            "failed" => Ok(RecordStatus::Failed),
            other => Err(format!("unknown record status '{}'", other)),
        }
    }
}

/// The persisted outcome of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsRecord {
    pub job_id: String,
    pub user_id: Option<String>,
    pub file_name: Option<String>,
    #[serde(flatten)]
    pub stats: LogStats,
    pub status: RecordStatus,
    pub metadata: Map<String, Value>,
    pub processed_at: DateTime<Utc>,
}

impl StatsRecord {
    /// Record for a job whose file was fully processed.
    pub fn completed(job: &Job, stats: LogStats) -> Self {
        let mut metadata = Map::new();
        metadata.insert(META_ORIGINAL_FILE_PATH.into(), json!(job.file_ref));
        metadata.insert(META_ATTEMPTS.into(), json!(job.attempts));

        Self {
            job_id: job.id.clone(),
            user_id: Some(job.user_id.clone()),
            file_name: Some(job.file_name.clone()),
            stats,
            status: RecordStatus::Completed,
            metadata,
            processed_at: Utc::now(),
        }
    }
}

/// Metadata written alongside a `failed` status.
pub fn failure_metadata(error: &str, attempts: u32) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert(META_ERROR.into(), json!(error));
    metadata.insert(META_ATTEMPTS.into(), json!(attempts));
    metadata
}

/// Fixed-width RFC 3339 so stored timestamps sort lexically.
pub(crate) fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Where workers hand their results.
///
/// Saves may be repeated for the same job (a job can run more than once),
/// so implementations overwrite instead of rejecting duplicates.
pub trait ResultStore: Send + Sync {
    /// Persists a completed record.
    fn save(&self, record: &StatsRecord) -> Result<(), StoreError>;

    /// Sets the terminal status of a job's record, creating it if needed.
    /// `metadata` is merged into any existing metadata.
    fn update(
        &self,
        job_id: &str,
        status: RecordStatus,
        metadata: &Map<String, Value>,
    ) -> Result<(), StoreError>;

    fn find(&self, job_id: &str) -> Result<Option<StatsRecord>, StoreError>;

    /// Most recently processed records first.
    fn list(&self, user_id: Option<&str>, limit: u64) -> Result<Vec<StatsRecord>, StoreError>;
}
