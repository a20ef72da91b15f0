//! Rows of the `jobs` table and the guarded status updates on them.

use rusqlite::{params, OptionalExtension, Row};

use super::file_repo::{self, FileRow};
use super::{Database, DatabaseError};

/// Column-for-column image of a `jobs` row; enums are still text here.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub project_name: String,
    pub email: String,
    pub data_type: String,
    pub send_email: bool,
    pub is_test_data: bool,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            project_name: row.get("project_name")?,
            email: row.get("email")?,
            data_type: row.get("data_type")?,
            send_email: row.get("send_email")?,
            is_test_data: row.get("is_test_data")?,
            status: row.get("status")?,
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

/// A guarded status change. Applied only if the row is still in `from`.
#[derive(Debug, Clone)]
pub struct Transition<'a> {
    pub id: &'a str,
    pub from: &'a str,
    pub to: &'a str,
    pub updated_at: &'a str,
    pub completed_at: Option<&'a str>,
    pub error_message: Option<&'a str>,
}

#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a job together with its input files in one transaction.
pub fn insert_with_files(
    db: &Database,
    job: &JobRow,
    files: &[FileRow],
) -> Result<Vec<i64>, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO jobs (id, project_name, email, data_type, send_email, is_test_data,
             status, error_message, created_at, updated_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                job.id,
                job.project_name,
                job.email,
                job.data_type,
                job.send_email,
                job.is_test_data,
                job.status,
                job.error_message,
                job.created_at,
                job.updated_at,
                job.completed_at,
            ],
        )?;

        let mut ids = Vec::with_capacity(files.len());
        for file in files {
            ids.push(file_repo::insert_in(&tx, file)?);
        }

        tx.commit()?;
        Ok(ids)
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row("SELECT * FROM jobs WHERE id = ?1", params![id], JobRow::from_row)
            .optional()?;
        Ok(row)
    })
}

/// Applies a status transition as a single conditional UPDATE.
///
/// Returns `false` when the job does not exist or is no longer in
/// `transition.from`.
pub fn transition(db: &Database, transition: &Transition<'_>) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = ?3, updated_at = ?4, completed_at = ?5, error_message = ?6
             WHERE id = ?1 AND status = ?2",
            params![
                transition.id,
                transition.from,
                transition.to,
                transition.updated_at,
                transition.completed_at,
                transition.error_message,
            ],
        )?;
        Ok(changed == 1)
    })
}

/// One page of jobs, newest first, plus the number of jobs matching the
/// filter across all pages. A `None` status matches every job.
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    let limit = i64::try_from(filter.limit.unwrap_or(100)).unwrap_or(i64::MAX);
    let offset = i64::try_from(filter.offset.unwrap_or(0)).unwrap_or(i64::MAX);

    db.with_conn(|conn| {
        let status = filter.status.as_deref();
        let total: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE ?1 IS NULL OR status = ?1",
            params![status],
            |r| r.get(0),
        )?;

        let mut page = conn.prepare_cached(
            "SELECT * FROM jobs WHERE ?1 IS NULL OR status = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT ?2 OFFSET ?3",
        )?;
        let rows = page
            .query_map(params![status, limit, offset], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Deletes a job. Input files and the result row go with it.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        Ok(changed == 1)
    })
}
