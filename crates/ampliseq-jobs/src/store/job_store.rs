use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

use crate::db::file_repo::{self, FileRow};
use crate::db::job_repo::{self, JobFilter, JobRow, Transition};
use crate::db::result_repo::{self, ResultRow};
use crate::db::{Database, DatabaseError};
use crate::job::{
    AnalysisResult, ArtifactKind, ExecutionEffort, InputFile, Job, JobPage, JobStatus,
    SequencingLayout,
};

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Current time at the precision the store keeps.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: &'static str, s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DatabaseError::InvalidValue {
            column,
            value: s.to_string(),
        })
}

fn parse_status(s: &str) -> Result<JobStatus, DatabaseError> {
    JobStatus::parse(s).ok_or_else(|| DatabaseError::InvalidValue {
        column: "status",
        value: s.to_string(),
    })
}

fn job_to_row(job: &Job) -> JobRow {
    JobRow {
        id: job.job_id.clone(),
        project_name: job.project_name.clone(),
        email: job.email.clone(),
        data_type: job.data_type.as_str().to_string(),
        send_email: job.send_email,
        is_test_data: job.is_test_data,
        status: job.status.as_str().to_string(),
        error_message: job.error_message.clone(),
        created_at: format_timestamp(job.created_at),
        updated_at: format_timestamp(job.updated_at),
        completed_at: job.completed_at.map(format_timestamp),
    }
}

fn job_from_row(row: JobRow) -> Result<Job, DatabaseError> {
    let data_type: SequencingLayout =
        row.data_type
            .parse()
            .map_err(|_| DatabaseError::InvalidValue {
                column: "data_type",
                value: row.data_type.clone(),
            })?;

    Ok(Job {
        status: parse_status(&row.status)?,
        created_at: parse_timestamp("created_at", &row.created_at)?,
        updated_at: parse_timestamp("updated_at", &row.updated_at)?,
        completed_at: row
            .completed_at
            .as_deref()
            .map(|s| parse_timestamp("completed_at", s))
            .transpose()?,
        job_id: row.id,
        project_name: row.project_name,
        email: row.email,
        data_type,
        send_email: row.send_email,
        is_test_data: row.is_test_data,
        error_message: row.error_message,
    })
}

fn file_to_row(file: &InputFile) -> FileRow {
    FileRow {
        id: file.id,
        job_id: file.job_id.clone(),
        file_name: file.file_name.clone(),
        file_size: i64::try_from(file.file_size).unwrap_or(i64::MAX),
        storage_path: file.storage_path.to_string_lossy().into_owned(),
        uploaded_at: format_timestamp(file.uploaded_at),
    }
}

fn file_from_row(row: FileRow) -> Result<InputFile, DatabaseError> {
    let file_size = u64::try_from(row.file_size).map_err(|_| DatabaseError::InvalidValue {
        column: "file_size",
        value: row.file_size.to_string(),
    })?;
    Ok(InputFile {
        uploaded_at: parse_timestamp("uploaded_at", &row.uploaded_at)?,
        id: row.id,
        job_id: row.job_id,
        file_name: row.file_name,
        file_size,
        storage_path: PathBuf::from(row.storage_path),
    })
}

fn result_to_row(result: &AnalysisResult) -> Result<ResultRow, DatabaseError> {
    let artifacts: BTreeMap<&str, String> = result
        .artifacts
        .iter()
        .map(|(kind, path)| (kind.as_str(), path.to_string_lossy().into_owned()))
        .collect();
    let artifacts = serde_json::to_string(&artifacts).map_err(|e| DatabaseError::InvalidValue {
        column: "artifacts",
        value: e.to_string(),
    })?;

    Ok(ResultRow {
        job_id: result.job_id.clone(),
        artifacts,
        task_count: i64::from(result.effort.task_count),
        reported_duration_secs: result.effort.reported_duration_secs,
        log_path: result
            .log_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned()),
        created_at: format_timestamp(result.created_at),
    })
}

fn result_from_row(row: ResultRow) -> Result<AnalysisResult, DatabaseError> {
    let raw: BTreeMap<String, String> =
        serde_json::from_str(&row.artifacts).map_err(|_| DatabaseError::InvalidValue {
            column: "artifacts",
            value: row.artifacts.clone(),
        })?;

    let mut artifacts = BTreeMap::new();
    for (name, path) in raw {
        match ArtifactKind::parse(&name) {
            Some(kind) => {
                artifacts.insert(kind, PathBuf::from(path));
            }
            None => log::warn!(
                "Ignoring unknown artifact '{}' stored for job {}",
                name,
                row.job_id
            ),
        }
    }

    let task_count = u32::try_from(row.task_count).map_err(|_| DatabaseError::InvalidValue {
        column: "task_count",
        value: row.task_count.to_string(),
    })?;

    Ok(AnalysisResult {
        created_at: parse_timestamp("created_at", &row.created_at)?,
        job_id: row.job_id,
        artifacts,
        effort: ExecutionEffort {
            task_count,
            reported_duration_secs: row.reported_duration_secs,
        },
        log_path: row.log_path.map(PathBuf::from),
    })
}

// ─── Query types ────────────────────────────────────────────────────────────

/// Filter for [`JobStore::list`].
#[derive(Debug, Default, Clone)]
pub struct JobListFilter {
    pub status: Option<JobStatus>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

// ─── JobStore ───────────────────────────────────────────────────────────────

/// Persistent job store backed by rusqlite.
#[derive(Clone)]
pub struct JobStore {
    db: Database,
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Records a new pending job and its input files atomically.
    ///
    /// Returns the files with their assigned identifiers.
    pub fn create(&self, job: &Job, files: &[InputFile]) -> Result<Vec<InputFile>, DatabaseError> {
        let rows: Vec<FileRow> = files.iter().map(file_to_row).collect();
        let ids = job_repo::insert_with_files(&self.db, &job_to_row(job), &rows)?;

        log::info!(
            "Created job {} ({}, {} file(s))",
            job.job_id,
            job.data_type,
            files.len()
        );

        Ok(files
            .iter()
            .zip(ids)
            .map(|(file, id)| InputFile {
                id,
                ..file.clone()
            })
            .collect())
    }

    pub fn get(&self, job_id: &str) -> Result<Option<Job>, DatabaseError> {
        job_repo::find_by_id(&self.db, job_id)?
            .map(job_from_row)
            .transpose()
    }

    /// Input files of a job in upload order.
    pub fn files(&self, job_id: &str) -> Result<Vec<InputFile>, DatabaseError> {
        file_repo::find_by_job(&self.db, job_id)?
            .into_iter()
            .map(file_from_row)
            .collect()
    }

    pub fn result(&self, job_id: &str) -> Result<Option<AnalysisResult>, DatabaseError> {
        result_repo::find_by_job(&self.db, job_id)?
            .map(result_from_row)
            .transpose()
    }

    pub fn save_result(&self, result: &AnalysisResult) -> Result<(), DatabaseError> {
        result_repo::insert(&self.db, &result_to_row(result)?)
    }

    /// Lists jobs newest first.
    pub fn list(&self, filter: &JobListFilter) -> Result<JobPage, DatabaseError> {
        let (rows, total) = job_repo::query(
            &self.db,
            &JobFilter {
                status: filter.status.map(|s| s.as_str().to_string()),
                limit: filter.limit,
                offset: filter.offset,
            },
        )?;
        let jobs = rows
            .into_iter()
            .map(job_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(JobPage { jobs, total })
    }

    /// Removes a job together with its files and result rows.
    pub fn delete(&self, job_id: &str) -> Result<bool, DatabaseError> {
        job_repo::delete(&self.db, job_id)
    }

    /// `pending -> processing`. Returns `false` if the job is not pending.
    pub fn mark_processing(&self, job_id: &str) -> Result<bool, DatabaseError> {
        self.apply(job_id, JobStatus::Pending, JobStatus::Processing, None, None)
    }

    /// `processing -> completed`, stamping `completed_at`.
    pub fn mark_completed(&self, job_id: &str) -> Result<bool, DatabaseError> {
        let completed_at = format_timestamp(now());
        self.apply(
            job_id,
            JobStatus::Processing,
            JobStatus::Completed,
            Some(&completed_at),
            None,
        )
    }

    /// `processing -> failed` with a human-readable cause.
    pub fn mark_failed(&self, job_id: &str, message: &str) -> Result<bool, DatabaseError> {
        let message = match message.trim() {
            "" => "Pipeline failed for an unknown reason",
            trimmed => trimmed,
        };
        self.apply(
            job_id,
            JobStatus::Processing,
            JobStatus::Failed,
            None,
            Some(message),
        )
    }

    fn apply(
        &self,
        job_id: &str,
        from: JobStatus,
        to: JobStatus,
        completed_at: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        debug_assert!(from.can_transition_to(to));
        let updated_at = format_timestamp(now());
        let applied = job_repo::transition(
            &self.db,
            &Transition {
                id: job_id,
                from: from.as_str(),
                to: to.as_str(),
                updated_at: &updated_at,
                completed_at,
                error_message,
            },
        )?;

        if applied {
            log::info!("Job {}: {} -> {}", job_id, from, to);
        } else {
            log::warn!(
                "Job {}: rejected transition {} -> {} (not in {})",
                job_id,
                from,
                to,
                from
            );
        }
        Ok(applied)
    }
}
