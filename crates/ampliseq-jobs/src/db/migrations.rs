//! Schema upgrades, keyed on SQLite's `user_version` pragma.

use rusqlite::{Connection, TransactionBehavior};

use super::error::DatabaseError;

/// Ordered schema steps; the step at index `i` upgrades to version `i + 1`.
const STEPS: &[(&str, &str)] = &[
    ("jobs", include_str!("sql/001_create_jobs.sql")),
    ("input_files", include_str!("sql/002_create_input_files.sql")),
    ("results", include_str!("sql/003_create_results.sql")),
];

/// Highest schema version this build knows about.
pub fn latest_version() -> u32 {
    STEPS.len() as u32
}

/// Reads the version recorded in the database file.
pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Brings the schema up to [`latest_version`]. Each step commits on its own,
/// so a failed step leaves the earlier ones applied.
pub fn run_all(conn: &mut Connection) -> Result<(), DatabaseError> {
    let found = schema_version(conn)?;
    if found > latest_version() {
        return Err(DatabaseError::Migration {
            version: found,
            reason: format!(
                "database schema is newer than this build (expected at most {})",
                latest_version()
            ),
        });
    }

    for (index, (table, sql)) in STEPS.iter().enumerate().skip(found as usize) {
        let version = index as u32 + 1;
        log::info!("Upgrading schema to v{} ({})", version, table);

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute_batch(sql)
            .and_then(|_| tx.pragma_update(None, "user_version", version))
            .map_err(|e| DatabaseError::Migration {
                version,
                reason: e.to_string(),
            })?;
        tx.commit()?;
    }

    Ok(())
}
