//! Job repository: state-transition SQL for the `jobs` table.
//!
//! Functions take a plain `&Connection` so the queue can compose several of
//! them inside one transaction. Timestamps are Unix epoch milliseconds.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub seq: i64,
    pub id: String,
    pub file_ref: String,
    pub user_id: String,
    pub file_name: String,
    pub size_bytes: i64,
    pub priority: i64,
    pub state: String,
    pub attempts: i64,
    pub max_attempts: i64,
    pub error: Option<String>,
    pub enqueued_at: i64,
    pub run_at: Option<i64>,
    pub lease_expires_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            seq: row.get("seq")?,
            id: row.get("id")?,
            file_ref: row.get("file_ref")?,
            user_id: row.get("user_id")?,
            file_name: row.get("file_name")?,
            size_bytes: row.get("size_bytes")?,
            priority: row.get("priority")?,
            state: row.get("state")?,
            attempts: row.get("attempts")?,
            max_attempts: row.get("max_attempts")?,
            error: row.get("error")?,
            enqueued_at: row.get("enqueued_at")?,
            run_at: row.get("run_at")?,
            lease_expires_at: row.get("lease_expires_at")?,
            finished_at: row.get("finished_at")?,
        })
    }
}

/// Fields supplied when a job is first written.
#[derive(Debug, Clone)]
pub struct NewJobRow<'a> {
    pub id: &'a str,
    pub file_ref: &'a str,
    pub user_id: &'a str,
    pub file_name: &'a str,
    pub size_bytes: i64,
    pub priority: i64,
    pub max_attempts: i64,
    pub enqueued_at: i64,
}

/// Inserts a new job in the `waiting` state with zero attempts.
pub fn insert(conn: &Connection, job: &NewJobRow<'_>) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO jobs (id, file_ref, user_id, file_name, size_bytes, priority,
         state, attempts, max_attempts, enqueued_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'waiting', 0, ?7, ?8)",
        params![
            job.id,
            job.file_ref,
            job.user_id,
            job.file_name,
            job.size_bytes,
            job.priority,
            job.max_attempts,
            job.enqueued_at,
        ],
    )?;
    Ok(())
}

/// Finds a job by its ID.
pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM jobs WHERE id = ?1",
            params![id],
            JobRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Moves delayed jobs whose backoff has elapsed back to `waiting`.
pub fn promote_due(conn: &Connection, now: i64) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET state = 'waiting', run_at = NULL
         WHERE state = 'delayed' AND run_at <= ?1",
        params![now],
    )?;
    Ok(changed)
}

/// Ids of expired leases, split into `(with attempts left, exhausted)`.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ExpiredLeases {
    pub reverted: Vec<String>,
    pub failed: Vec<String>,
}

/// Handles leases whose visibility deadline passed without an ack or nack.
///
/// Jobs with attempts left go back to `waiting`; jobs that already used
/// their last attempt become terminally `failed`.
pub fn expire_leases(conn: &Connection, now: i64) -> Result<ExpiredLeases, DatabaseError> {
    let mut expired = ExpiredLeases::default();
    {
        let mut stmt = conn.prepare(
            "SELECT id, attempts >= max_attempts FROM jobs
             WHERE state = 'active' AND lease_expires_at <= ?1
             ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![now], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, bool>(1)?))
        })?;
        for row in rows {
            let (id, exhausted) = row?;
            if exhausted {
                expired.failed.push(id);
            } else {
                expired.reverted.push(id);
            }
        }
    }

    conn.execute(
        "UPDATE jobs SET state = 'failed', lease_expires_at = NULL, finished_at = ?1,
         error = 'lease expired after ' || attempts || ' attempt(s)'
         WHERE state = 'active' AND lease_expires_at <= ?1 AND attempts >= max_attempts",
        params![now],
    )?;
    conn.execute(
        "UPDATE jobs SET state = 'waiting', lease_expires_at = NULL
         WHERE state = 'active' AND lease_expires_at <= ?1",
        params![now],
    )?;
    Ok(expired)
}

/// Claims the next `waiting` job by priority then enqueue order, marking it
/// `active` and counting the attempt.
pub fn lease_next(
    conn: &Connection,
    lease_until: i64,
) -> Result<Option<JobRow>, DatabaseError> {
    let seq: Option<i64> = conn
        .query_row(
            "SELECT seq FROM jobs WHERE state = 'waiting'
             ORDER BY priority ASC, seq ASC LIMIT 1",
            [],
            |r| r.get(0),
        )
        .optional()?;

    let Some(seq) = seq else {
        return Ok(None);
    };

    let changed = conn.execute(
        "UPDATE jobs SET state = 'active', attempts = attempts + 1, lease_expires_at = ?2
         WHERE seq = ?1 AND state = 'waiting'",
        params![seq, lease_until],
    )?;
    if changed == 0 {
        return Ok(None);
    }

    let row = conn.query_row(
        "SELECT * FROM jobs WHERE seq = ?1",
        params![seq],
        JobRow::from_row,
    )?;
    Ok(Some(row))
}

// The transitions below are fenced by `attempt`: each lease bumps
// `attempts`, so a holder whose lease was re-granted no longer matches.
// A holder may still finish a lease that expired back to `waiting` as long
// as nobody leased the job again.

/// Pushes the visibility deadline of an active lease forward. Returns
/// `false` when `attempt` no longer holds the lease.
pub fn extend_lease(
    conn: &Connection,
    id: &str,
    attempt: i64,
    lease_until: i64,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET lease_expires_at = ?3
         WHERE id = ?1 AND attempts = ?2 AND state = 'active'",
        params![id, attempt, lease_until],
    )?;
    Ok(changed > 0)
}

/// Marks a job `completed`.
pub fn mark_completed(
    conn: &Connection,
    id: &str,
    attempt: i64,
    now: i64,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET state = 'completed', lease_expires_at = NULL, run_at = NULL,
         finished_at = ?3
         WHERE id = ?1 AND attempts = ?2 AND state IN ('active', 'waiting')",
        params![id, attempt, now],
    )?;
    Ok(changed > 0)
}

/// Schedules a retry: the job becomes `delayed` until `run_at`.
pub fn mark_delayed(
    conn: &Connection,
    id: &str,
    attempt: i64,
    run_at: i64,
    error: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET state = 'delayed', lease_expires_at = NULL, run_at = ?3, error = ?4
         WHERE id = ?1 AND attempts = ?2 AND state IN ('active', 'waiting')",
        params![id, attempt, run_at, error],
    )?;
    Ok(changed > 0)
}

/// Marks a job terminally `failed`, recording the error.
pub fn mark_failed(
    conn: &Connection,
    id: &str,
    attempt: i64,
    now: i64,
    error: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET state = 'failed', lease_expires_at = NULL, run_at = NULL,
         finished_at = ?3, error = ?4
         WHERE id = ?1 AND attempts = ?2 AND state IN ('active', 'waiting')",
        params![id, attempt, now, error],
    )?;
    Ok(changed > 0)
}

/// Returns `(state, count)` pairs for every state present in the table.
pub fn count_by_state(conn: &Connection) -> Result<Vec<(String, u64)>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM jobs GROUP BY state")?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, u64>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Earliest `run_at` among delayed jobs, if any.
pub fn next_run_at(conn: &Connection) -> Result<Option<i64>, DatabaseError> {
    let next: Option<i64> = conn.query_row(
        "SELECT MIN(run_at) FROM jobs WHERE state = 'delayed'",
        [],
        |r| r.get(0),
    )?;
    Ok(next)
}

/// Deletes a job that has not started running. Active and finished jobs
/// are left untouched.
pub fn delete_pending(conn: &Connection, id: &str) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "DELETE FROM jobs WHERE id = ?1 AND state IN ('waiting', 'delayed')",
        params![id],
    )?;
    Ok(changed > 0)
}

/// Deletes finished jobs whose `finished_at` is older than `before`.
pub fn purge_finished(conn: &Connection, before: i64) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "DELETE FROM jobs WHERE state IN ('completed', 'failed') AND finished_at < ?1",
        params![before],
    )?;
    Ok(changed)
}
