//! Input file repository: rows of the `input_files` table.

use rusqlite::{params, Connection, Row};

use super::{Database, DatabaseError};

/// A raw input file row.
#[derive(Debug, Clone)]
pub struct FileRow {
    /// Assigned by SQLite; ignored on insert.
    pub id: i64,
    pub job_id: String,
    pub file_name: String,
    pub file_size: i64,
    pub storage_path: String,
    pub uploaded_at: String,
}

impl FileRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            file_name: row.get("file_name")?,
            file_size: row.get("file_size")?,
            storage_path: row.get("storage_path")?,
            uploaded_at: row.get("uploaded_at")?,
        })
    }
}

/// Inserts a file row on an open connection or transaction.
pub(crate) fn insert_in(conn: &Connection, file: &FileRow) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO input_files (job_id, file_name, file_size, storage_path, uploaded_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            file.job_id,
            file.file_name,
            file.file_size,
            file.storage_path,
            file.uploaded_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Returns a job's files in upload order.
pub fn find_by_job(db: &Database, job_id: &str) -> Result<Vec<FileRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM input_files WHERE job_id = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![job_id], FileRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
