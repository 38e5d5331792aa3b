//! Job repository: row-level operations on the `jobs` table.
//!
//! Functions here are string-typed and take timestamps explicitly; the
//! typed facade lives in [`crate::jobs::JobStore`].

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: i64,
    pub job_type: String,
    pub status: String,
    pub file_path: String,
    pub params: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error_message: Option<String>,
    pub result: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_type: row.get("job_type")?,
            status: row.get("status")?,
            file_path: row.get("file_path")?,
            params: row.get("params")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            error_message: row.get("error_message")?,
            result: row.get("result")?,
        })
    }
}

/// Fields supplied when a job is first recorded.
#[derive(Debug, Clone)]
pub struct NewJobRow<'a> {
    pub job_type: &'a str,
    pub file_path: &'a str,
    pub params: Option<&'a str>,
    pub created_at: &'a str,
}

/// A conditional status transition.
///
/// The update only applies while the persisted status equals
/// `expected_status`. `None` fields leave the stored value untouched.
#[derive(Debug, Clone)]
pub struct StatusUpdate<'a> {
    pub status: &'a str,
    pub expected_status: &'a str,
    pub started_at: Option<&'a str>,
    pub completed_at: Option<&'a str>,
    pub error_message: Option<&'a str>,
    pub result: Option<&'a str>,
}

/// Inserts a new pending job row and returns its id.
pub fn insert(db: &Database, job: &NewJobRow<'_>) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (job_type, status, file_path, params, created_at)
             VALUES (?1, 'pending', ?2, ?3, ?4)",
            params![job.job_type, job.file_path, job.params, job.created_at],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Finds a job by its id.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM jobs WHERE id = ?1",
                params![id],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Lists pending jobs, oldest first.
pub fn list_pending(db: &Database, limit: u64) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE status = 'pending'
             ORDER BY created_at ASC, id ASC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists running jobs, earliest start first.
pub fn list_running(db: &Database) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE status = 'running'
             ORDER BY started_at ASC, id ASC",
        )?;
        let rows = stmt
            .query_map([], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists failed or timed-out jobs completed after `cutoff`, newest first.
pub fn list_failed_since(db: &Database, cutoff: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE status IN ('failed', 'timeout')
             AND completed_at > ?1 ORDER BY completed_at DESC",
        )?;
        let rows = stmt
            .query_map(params![cutoff], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists all jobs, newest first.
pub fn list_recent(db: &Database, limit: u64) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM jobs ORDER BY created_at DESC, id DESC LIMIT ?1")?;
        let rows = stmt
            .query_map(params![limit as i64], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts jobs with the given status.
pub fn count_by_status(db: &Database, status: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Applies a conditional status transition. Returns `true` if a row changed.
pub fn update_status(
    db: &Database,
    id: i64,
    update: &StatusUpdate<'_>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = ?2,
                started_at = COALESCE(?3, started_at),
                completed_at = COALESCE(?4, completed_at),
                error_message = COALESCE(?5, error_message),
                result = COALESCE(?6, result)
             WHERE id = ?1 AND status = ?7",
            params![
                id,
                update.status,
                update.started_at,
                update.completed_at,
                update.error_message,
                update.result,
                update.expected_status,
            ],
        )?;
        Ok(changed > 0)
    })
}

/// Deletes a job only while it is still pending. Returns `true` if deleted.
pub fn delete_pending(db: &Database, id: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "DELETE FROM jobs WHERE id = ?1 AND status = 'pending'",
            params![id],
        )?;
        Ok(changed > 0)
    })
}

/// Deletes terminal jobs whose `completed_at` is older than `cutoff`.
pub fn delete_terminal_before(db: &Database, cutoff: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let deleted = conn.execute(
            "DELETE FROM jobs WHERE status IN ('completed', 'failed', 'timeout')
             AND completed_at < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    })
}
