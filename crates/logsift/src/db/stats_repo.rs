//! Log statistics repository, one row per processed job.
//!
//! JSON columns (`ip_addresses`, `keyword_matches`, `metadata`) are stored
//! as text and decoded by the result store.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw `log_stats` row.
#[derive(Debug, Clone, PartialEq)]
pub struct LogStatsRow {
    pub job_id: String,
    pub user_id: Option<String>,
    pub file_name: Option<String>,
    pub total_entries: i64,
    pub error_count: i64,
    pub warning_count: i64,
    pub ip_addresses: String,
    pub keyword_matches: String,
    pub status: String,
    pub metadata: String,
    pub processed_at: String,
}

impl LogStatsRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_id: row.get("job_id")?,
            user_id: row.get("user_id")?,
            file_name: row.get("file_name")?,
            total_entries: row.get("total_entries")?,
            error_count: row.get("error_count")?,
            warning_count: row.get("warning_count")?,
            ip_addresses: row.get("ip_addresses")?,
            keyword_matches: row.get("keyword_matches")?,
            status: row.get("status")?,
            metadata: row.get("metadata")?,
            processed_at: row.get("processed_at")?,
        })
    }
}

/// Writes a full stats row, replacing any earlier row for the same job.
///
/// A job can be executed more than once, so a second save for the same
/// `job_id` overwrites instead of failing on the primary key.
pub fn upsert(db: &Database, row: &LogStatsRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO log_stats (job_id, user_id, file_name, total_entries, error_count,
             warning_count, ip_addresses, keyword_matches, status, metadata, processed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(job_id) DO UPDATE SET
               user_id = excluded.user_id,
               file_name = excluded.file_name,
               total_entries = excluded.total_entries,
               error_count = excluded.error_count,
               warning_count = excluded.warning_count,
               ip_addresses = excluded.ip_addresses,
               keyword_matches = excluded.keyword_matches,
               status = excluded.status,
               metadata = excluded.metadata,
               processed_at = excluded.processed_at",
            params![
                row.job_id,
                row.user_id,
                row.file_name,
                row.total_entries,
                row.error_count,
                row.warning_count,
                row.ip_addresses,
                row.keyword_matches,
                row.status,
                row.metadata,
                row.processed_at,
            ],
        )?;
        Ok(())
    })
}

/// Sets the status of a job's row, creating a bare row if none exists.
///
/// `metadata` (a JSON object) is merged into the stored metadata with
/// `json_patch`, so keys written by an earlier save survive.
pub fn upsert_status(
    db: &Database,
    job_id: &str,
    status: &str,
    metadata: &str,
    processed_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO log_stats (job_id, status, metadata, processed_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(job_id) DO UPDATE SET
               status = excluded.status,
               metadata = json_patch(log_stats.metadata, excluded.metadata),
               processed_at = excluded.processed_at",
            params![job_id, status, metadata, processed_at],
        )?;
        Ok(())
    })
}

/// Finds the stats row for a job.
pub fn find_by_job_id(db: &Database, job_id: &str) -> Result<Option<LogStatsRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM log_stats WHERE job_id = ?1",
                params![job_id],
                LogStatsRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Lists rows newest first, optionally restricted to one user.
pub fn list(
    db: &Database,
    user_id: Option<&str>,
    limit: u64,
) -> Result<Vec<LogStatsRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let where_clause = match user_id {
            Some(user) => {
                param_values.push(Box::new(user.to_string()));
                "WHERE user_id = ?1".to_string()
            }
            None => String::new(),
        };
        param_values.push(Box::new(limit as i64));

        let sql = format!(
            "SELECT * FROM log_stats {} ORDER BY processed_at DESC, job_id ASC LIMIT ?{}",
            where_clause,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), LogStatsRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
