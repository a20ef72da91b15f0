//! Result repository: the at-most-one `results` row per job.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw result row. `artifacts` is a JSON object of name -> path.
#[derive(Debug, Clone)]
pub struct ResultRow {
    pub job_id: String,
    pub artifacts: String,
    pub task_count: i64,
    pub reported_duration_secs: Option<f64>,
    pub log_path: Option<String>,
    pub created_at: String,
}

impl ResultRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_id: row.get("job_id")?,
            artifacts: row.get("artifacts")?,
            task_count: row.get("task_count")?,
            reported_duration_secs: row.get("reported_duration_secs")?,
            log_path: row.get("log_path")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Inserts the result for a job. Fails if one already exists.
pub fn insert(db: &Database, result: &ResultRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO results (job_id, artifacts, task_count, reported_duration_secs,
             log_path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                result.job_id,
                result.artifacts,
                result.task_count,
                result.reported_duration_secs,
                result.log_path,
                result.created_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds the result of a job.
pub fn find_by_job(db: &Database, job_id: &str) -> Result<Option<ResultRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM results WHERE job_id = ?1",
                params![job_id],
                ResultRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}
