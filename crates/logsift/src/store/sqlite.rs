use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::db::stats_repo::{self, LogStatsRow};
use crate::db::{Database, DatabaseError};
use crate::error::StoreError;
use crate::processor::LogStats;

use super::{format_timestamp, RecordStatus, ResultStore, StatsRecord};

/// Result store backed by the `log_stats` table.
#[derive(Clone)]
pub struct SqliteResultStore {
    db: Database,
}

impl SqliteResultStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl ResultStore for SqliteResultStore {
    fn save(&self, record: &StatsRecord) -> Result<(), StoreError> {
        let row = to_row(record)?;
        stats_repo::upsert(&self.db, &row).map_err(|source| StoreError::Persist {
            job_id: record.job_id.clone(),
            source,
        })?;
        log::debug!("Saved stats for job {}", record.job_id);
        Ok(())
    }

    fn update(
        &self,
        job_id: &str,
        status: RecordStatus,
        metadata: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        let metadata = serde_json::to_string(metadata)?;
        stats_repo::upsert_status(
            &self.db,
            job_id,
            status.as_str(),
            &metadata,
            &format_timestamp(&Utc::now()),
        )
        .map_err(|source| StoreError::Persist {
            job_id: job_id.to_string(),
            source,
        })?;
        log::debug!("Marked stats for job {} as {}", job_id, status.as_str());
        Ok(())
    }

    fn find(&self, job_id: &str) -> Result<Option<StatsRecord>, StoreError> {
        let row = stats_repo::find_by_job_id(&self.db, job_id)?;
        Ok(row.map(from_row).transpose()?)
    }

    fn list(&self, user_id: Option<&str>, limit: u64) -> Result<Vec<StatsRecord>, StoreError> {
        let rows = stats_repo::list(&self.db, user_id, limit)?;
        let records = rows
            .into_iter()
            .map(from_row)
            .collect::<Result<Vec<_>, DatabaseError>>()?;
        Ok(records)
    }
}

fn to_row(record: &StatsRecord) -> Result<LogStatsRow, StoreError> {
    Ok(LogStatsRow {
        job_id: record.job_id.clone(),
        user_id: record.user_id.clone(),
        file_name: record.file_name.clone(),
        total_entries: to_i64(record.stats.total_entries),
        error_count: to_i64(record.stats.error_count),
        warning_count: to_i64(record.stats.warning_count),
        ip_addresses: serde_json::to_string(&record.stats.ip_addresses)?,
        keyword_matches: serde_json::to_string(&record.stats.keyword_matches)?,
        status: record.status.as_str().to_string(),
        metadata: serde_json::to_string(&record.metadata)?,
        processed_at: format_timestamp(&record.processed_at),
    })
}

fn from_row(row: LogStatsRow) -> Result<StatsRecord, DatabaseError> {
    let ip_addresses: Vec<String> = decode("ip_addresses", &row.ip_addresses)?;
    let keyword_matches: BTreeMap<String, u64> = decode("keyword_matches", &row.keyword_matches)?;
    let metadata: Map<String, Value> = decode("metadata", &row.metadata)?;
    let status = row
        .status
        .parse::<RecordStatus>()
        .map_err(|reason| DatabaseError::Corrupt {
            column: "status",
            reason,
        })?;
    let processed_at = DateTime::parse_from_rfc3339(&row.processed_at)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Corrupt {
            column: "processed_at",
            reason: e.to_string(),
        })?;

    Ok(StatsRecord {
        job_id: row.job_id,
        user_id: row.user_id,
        file_name: row.file_name,
        stats: LogStats {
            total_entries: row.total_entries.max(0) as u64,
            error_count: row.error_count.max(0) as u64,
            warning_count: row.warning_count.max(0) as u64,
            ip_addresses,
            keyword_matches,
        },
        status,
        metadata,
        processed_at,
    })
}

fn decode<T: serde::de::DeserializeOwned>(
    column: &'static str,
    text: &str,
) -> Result<T, DatabaseError> {
    serde_json::from_str(text).map_err(|e| DatabaseError::Corrupt {
        column,
        reason: e.to_string(),
    })
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
