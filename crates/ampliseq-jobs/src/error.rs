use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::job::JobStatus;
use crate::manifest::Mate;

#[derive(Error, Debug)]
pub enum JobsError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Composition data error: {0}")]
    Composition(#[from] crate::pipeline::composition::CompositionError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

/// A single rejected submission field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Every problem found in a submission, reported together.
#[derive(Error, Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    pub fields: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.fields.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f.field == field)
    }

    /// Returns `Ok(())` when nothing was collected.
    pub fn into_result(self) -> std::result::Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .fields
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove '{path}': {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid file name: '{0}'")]
    InvalidName(String),

    #[error("Path escapes the storage root: {0}")]
    OutsideRoot(PathBuf),

    #[error("Could not find a free file name for '{0}'")]
    NameExhausted(PathBuf),
}

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("No input files were provided")]
    NoInputFiles,

    #[error("Single-end layout expects exactly one input file, found {count}")]
    TooManyInputs { count: usize },

    #[error("No {mate} file found (expected a name containing {marker})")]
    MissingMate { mate: Mate, marker: &'static str },

    #[error("Ambiguous {mate} files: {}", candidates.join(", "))]
    AmbiguousMate { mate: Mate, candidates: Vec<String> },

    #[error("Cannot resolve input path '{path}': {source}")]
    InvalidPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode manifest: {0}")]
    Encode(#[from] csv::Error),

    #[error("Failed to write manifest '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Failed to launch pipeline '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Nextflow error: {detail}")]
    ExternalProcess {
        exit_code: Option<i32>,
        detail: String,
    },

    #[error("Pipeline timed out after {} seconds", limit.as_secs())]
    Timeout { limit: Duration },

    #[error("Failed while waiting for pipeline process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Failed to start process runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("Batch {operation} request failed: {message}")]
    Batch {
        operation: &'static str,
        message: String,
    },
}

impl ExecutionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("{resource} not found for job {job_id}")]
    NotFound {
        resource: &'static str,
        job_id: String,
    },

    #[error("Job {job_id} is {actual}; this requires {required}")]
    InvalidState {
        job_id: String,
        actual: JobStatus,
        required: JobStatus,
    },
}

impl QueryError {
    pub fn job_not_found(job_id: &str) -> Self {
        Self::NotFound {
            resource: "Job",
            job_id: job_id.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Job {0} already has an active run")]
    AlreadyActive(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, JobsError>;
