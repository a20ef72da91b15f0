use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Cannot prepare database directory '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Schema upgrade to `version` did not apply.
    #[error("Schema upgrade to v{version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// A stored column held something the domain types reject.
    #[error("Column '{column}' holds unrecognised value '{value}'")]
    InvalidValue { column: &'static str, value: String },

    #[error("Database lock poisoned")]
    LockPoisoned,
}
