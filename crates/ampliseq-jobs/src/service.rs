//! The boundary every caller goes through: submission and queries.
//!
//! Nothing here waits for a pipeline run. `submit` records the job and hands
//! its identity to a [`Dispatcher`]; the query methods read whatever state
//! the store holds at that moment.

use std::path::Path;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Deserialize;

use crate::config::TestDatasetConfig;
use crate::error::{JobsError, QueryError, Result, ValidationErrors};
use crate::job::{
    AnalysisResult, ArtifactKind, InputFile, Job, JobDetail, JobPage, JobStatus,
    SequencingLayout, StatusSnapshot,
};
use crate::pipeline::{parse_composition_table, CompositionSummary};
use crate::storage::{BlobStore, FileStorage, JobWorkspace};
use crate::store::{self, JobListFilter, JobStore};
use crate::worker::Dispatcher;

const MAX_PROJECT_NAME_LEN: usize = 255;

static RE_EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

/// One uploaded file as received from the client.
#[derive(Debug, Clone, Deserialize)]
pub struct Upload {
    pub file_name: String,
    pub content: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            content: content.into(),
        }
    }
}

/// A job submission before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub project_name: String,
    pub email: String,
    /// `single-end` or `paired-end`.
    pub data_type: String,
    #[serde(default = "default_send_email")]
    pub send_email: bool,
    #[serde(default)]
    pub use_test_dataset: bool,
    #[serde(default)]
    pub files: Vec<Upload>,
}

fn default_send_email() -> bool {
    true
}

/// Fields of a request that passed validation.
struct ValidSubmission {
    project_name: String,
    email: String,
    layout: SequencingLayout,
}

fn validate(request: &SubmitRequest) -> std::result::Result<ValidSubmission, ValidationErrors> {
    let mut errors = ValidationErrors::default();

    let project_name = request.project_name.trim();
    if project_name.is_empty() {
        errors.push("project_name", "Project name is required");
    } else if project_name.chars().count() > MAX_PROJECT_NAME_LEN {
        errors.push(
            "project_name",
            format!(
                "Project name must be at most {} characters",
                MAX_PROJECT_NAME_LEN
            ),
        );
    }

    let email = request.email.trim();
    if email.is_empty() {
        errors.push("email", "Email address is required");
    } else if !RE_EMAIL.is_match(email) {
        errors.push("email", "Enter a valid email address");
    }

    let layout = match request.data_type.trim().parse::<SequencingLayout>() {
        Ok(layout) => layout,
        Err(message) => {
            errors.push("data_type", message);
            SequencingLayout::SingleEnd
        }
    };

    if !request.use_test_dataset {
        if request.files.is_empty() {
            errors.push(
                "files",
                "Upload at least one sequencing file or use the test dataset",
            );
        }
        if request.files.iter().any(|f| f.file_name.trim().is_empty()) {
            errors.push("files", "Every uploaded file needs a name");
        }
    }

    errors.into_result()?;
    Ok(ValidSubmission {
        project_name: project_name.to_string(),
        email: email.to_string(),
        layout,
    })
}

pub struct JobService {
    store: JobStore,
    storage: Arc<FileStorage>,
    dispatcher: Arc<dyn Dispatcher>,
    test_dataset: TestDatasetConfig,
}

impl JobService {
    pub fn new(
        store: JobStore,
        storage: Arc<FileStorage>,
        dispatcher: Arc<dyn Dispatcher>,
        test_dataset: TestDatasetConfig,
    ) -> Self {
        Self {
            store,
            storage,
            dispatcher,
            test_dataset,
        }
    }

    /// Creates a pending job, stores its inputs and dispatches its run.
    ///
    /// Returns as soon as the run is queued. Invalid requests fail before
    /// anything is written; a failed dispatch removes the job again.
    pub fn submit(&self, request: SubmitRequest) -> Result<Job> {
        let valid = validate(&request)?;

        let job_id = uuid::Uuid::new_v4().to_string();
        let namespace = JobWorkspace::namespace(&job_id);

        let files = match self.materialize(&job_id, &request, valid.layout) {
            Ok(files) => files,
            Err(e) => {
                self.discard_blobs(&namespace);
                return Err(e);
            }
        };

        let ts = store::now();
        let job = Job {
            job_id: job_id.clone(),
            project_name: valid.project_name,
            email: valid.email,
            data_type: valid.layout,
            send_email: request.send_email,
            is_test_data: request.use_test_dataset,
            status: JobStatus::Pending,
            created_at: ts,
            updated_at: ts,
            completed_at: None,
            error_message: None,
        };

        if let Err(e) = self.store.create(&job, &files) {
            self.discard_blobs(&namespace);
            return Err(e.into());
        }

        if let Err(e) = self.dispatcher.dispatch(&job_id) {
            log::error!("Failed to dispatch job {}: {}", job_id, e);
            if let Err(db_err) = self.store.delete(&job_id) {
                log::error!("Failed to remove undispatched job {}: {}", job_id, db_err);
            }
            self.discard_blobs(&namespace);
            return Err(e.into());
        }

        log::info!(
            "Submitted job {} ({}, test dataset: {})",
            job_id,
            job.data_type,
            job.is_test_data
        );
        Ok(job)
    }

    pub fn get_status(&self, job_id: &str) -> Result<StatusSnapshot> {
        Ok(self.require_job(job_id)?.snapshot())
    }

    pub fn get_detail(&self, job_id: &str) -> Result<JobDetail> {
        let job = self.require_job(job_id)?;
        let files = self.store.files(job_id)?;
        let result = self.store.result(job_id)?;
        Ok(JobDetail { job, files, result })
    }

    /// The result of a completed job.
    pub fn get_results(&self, job_id: &str) -> Result<AnalysisResult> {
        let job = self.require_job(job_id)?;
        require_completed(&job)?;

        self.store.result(job_id)?.ok_or_else(|| {
            log::error!("Job {} is completed but has no result record", job_id);
            QueryError::NotFound {
                resource: "Result",
                job_id: job_id.to_string(),
            }
            .into()
        })
    }

    /// Genus-level composition of a completed job.
    pub fn get_composition(&self, job_id: &str) -> Result<CompositionSummary> {
        let job = self.require_job(job_id)?;
        require_completed(&job)?;

        let not_found = || -> JobsError {
            QueryError::NotFound {
                resource: "Composition data",
                job_id: job_id.to_string(),
            }
            .into()
        };

        let table = self
            .store
            .result(job_id)?
            .and_then(|r| r.artifact(ArtifactKind::CompositionTable).map(Path::to_path_buf))
            .ok_or_else(not_found)?;
        if !self.storage.exists(&table) {
            log::warn!(
                "Composition table of job {} is recorded but missing from storage",
                job_id
            );
            return Err(not_found());
        }

        let content = self.storage.get(&table)?;
        Ok(parse_composition_table(&content)?)
    }

    pub fn list_jobs(&self, filter: &JobListFilter) -> Result<JobPage> {
        Ok(self.store.list(filter)?)
    }

    fn require_job(&self, job_id: &str) -> Result<Job> {
        self.store
            .get(job_id)?
            .ok_or_else(|| QueryError::job_not_found(job_id).into())
    }

    fn materialize(
        &self,
        job_id: &str,
        request: &SubmitRequest,
        layout: SequencingLayout,
    ) -> Result<Vec<InputFile>> {
        let namespace = JobWorkspace::uploads_namespace(job_id);
        let uploaded_at = store::now();

        if request.use_test_dataset {
            if !request.files.is_empty() {
                log::warn!(
                    "Ignoring {} uploaded file(s) for test dataset job {}",
                    request.files.len(),
                    job_id
                );
            }

            let mut files = Vec::new();
            for source in self.test_dataset.files_for(layout) {
                let file_name = source
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let storage_path = self.storage.put_file(&namespace, &file_name, &source)?;
                files.push(InputFile {
                    id: 0,
                    job_id: job_id.to_string(),
                    file_size: stored_size(&storage_path),
                    file_name,
                    storage_path,
                    uploaded_at,
                });
            }
            return Ok(files);
        }

        let mut files = Vec::with_capacity(request.files.len());
        for upload in &request.files {
            let storage_path = self
                .storage
                .put(&namespace, &upload.file_name, &upload.content)?;
            files.push(InputFile {
                id: 0,
                job_id: job_id.to_string(),
                file_name: upload.file_name.clone(),
                file_size: upload.content.len() as u64,
                storage_path,
                uploaded_at,
            });
        }
        Ok(files)
    }

    fn discard_blobs(&self, namespace: &str) {
        if let Err(e) = self.storage.remove_namespace(namespace) {
            log::warn!("Failed to clean up {}: {}", namespace, e);
        }
    }
}

fn require_completed(job: &Job) -> std::result::Result<(), QueryError> {
    if job.status == JobStatus::Completed {
        Ok(())
    } else {
        Err(QueryError::InvalidState {
            job_id: job.job_id.clone(),
            actual: job.status,
            required: JobStatus::Completed,
        })
    }
}

fn stored_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or_default()
}
