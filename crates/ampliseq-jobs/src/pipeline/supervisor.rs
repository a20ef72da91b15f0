use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, info_span, warn};

use crate::config::Config;
use crate::error::{ExecutionError, JobsError};
use crate::job::{Job, JobStatus};
use crate::manifest::ManifestBuilder;
use crate::sanitize;
use crate::storage::{BlobStore, JobWorkspace};
use crate::store::JobStore;

use super::command::CommandBuilder;
use super::composition::CompositionSummarizer;
use super::executor::{PipelineExecutor, ProcessOutcome};
use super::harvester::ResultHarvester;
use super::profile::{EnvironmentCapability, ProfileSelector, RunMode};

const UNKNOWN_FAILURE: &str = "Pipeline failed for an unknown reason";

/// Drives one job from `pending` to a terminal state.
///
/// A run owns its job: it is the only writer of the job's status and of its
/// workspace directory. Every failure after the job has been accepted ends
/// in `failed` with a bounded cause; nothing escapes as an error.
pub struct Supervisor {
    store: JobStore,
    executor: Arc<dyn PipelineExecutor>,
    data_directory: PathBuf,
    manifest: ManifestBuilder,
    profiles: ProfileSelector,
    commands: CommandBuilder,
    harvester: ResultHarvester,
    summarizer: CompositionSummarizer,
    timeout: Duration,
    error_message_limit: usize,
}

impl Supervisor {
    pub fn new(
        config: &Config,
        store: JobStore,
        storage: Arc<dyn BlobStore>,
        executor: Arc<dyn PipelineExecutor>,
        capability: EnvironmentCapability,
    ) -> Self {
        Self {
            store,
            data_directory: config.data_directory.clone(),
            manifest: ManifestBuilder::default(),
            profiles: ProfileSelector::new(config.resources.clone(), capability),
            commands: CommandBuilder::new(config.pipeline.clone()),
            harvester: ResultHarvester::new(storage),
            summarizer: CompositionSummarizer::new(
                config.composition.clone(),
                Arc::clone(&executor),
            ),
            executor,
            timeout: config.pipeline.timeout(),
            error_message_limit: config.pipeline.error_message_limit,
        }
    }

    /// Runs the composition script through `executor` rather than the
    /// pipeline executor.
    pub fn with_summary_executor(mut self, executor: Arc<dyn PipelineExecutor>) -> Self {
        self.summarizer = self.summarizer.with_executor(executor);
        self
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Runs the job to completion. Returns the terminal status this run
    /// recorded, or `None` if the job could not be started.
    pub fn run(&self, job_id: &str) -> Option<JobStatus> {
        let _span = info_span!("supervisor", job_id = %job_id).entered();

        let job = match self.store.get(job_id) {
            Ok(Some(job)) => job,
            Ok(None) => {
                error!("Job {} vanished before it could run", job_id);
                return None;
            }
            Err(e) => {
                error!("Failed to load job {}: {}", job_id, e);
                return None;
            }
        };

        match self.store.mark_processing(job_id) {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    "Job {} is {} and cannot be started again",
                    job_id, job.status
                );
                return None;
            }
            Err(e) => {
                error!("Failed to mark job {} as processing: {}", job_id, e);
                return None;
            }
        }

        let workspace = JobWorkspace::new(&self.data_directory, job_id);
        match self.execute(&job, &workspace) {
            Ok(outcome) => self.complete(&job, &workspace, &outcome),
            Err(e) => {
                self.fail(job_id, &e.to_string());
                Some(JobStatus::Failed)
            }
        }
    }

    /// Records an unexpected fault (a panic in the run) as a failure.
    ///
    /// Also accepts a job still in `pending`, so it never stays stuck there.
    pub fn record_internal_error(&self, job_id: &str, detail: &str) {
        let message = format!("Internal error: {}", detail);
        if let Ok(Some(job)) = self.store.get(job_id) {
            if job.status == JobStatus::Pending {
                if let Err(e) = self.store.mark_processing(job_id) {
                    error!("Failed to mark job {} as processing: {}", job_id, e);
                }
            }
        }
        self.fail(job_id, &message);
    }

    fn execute(&self, job: &Job, workspace: &JobWorkspace) -> Result<ProcessOutcome, JobsError> {
        // Step 1: Prepare the job area
        {
            let _step = info_span!("prepare_workspace").entered();
            workspace.prepare()?;
        }

        // Step 2: Build the manifest before anything is launched
        let manifest_path = workspace.manifest_path();
        {
            let _step = info_span!("build_manifest").entered();
            let files = self.store.files(&job.job_id)?;
            let manifest = self.manifest.build(&files, job.data_type)?;
            manifest.write_to(&manifest_path)?;
            info!(
                "Wrote {} for {} input file(s)",
                sanitize::redact_path(&manifest_path),
                files.len()
            );
        }

        // Step 3: Run the pipeline
        let _step = info_span!("run_pipeline").entered();
        let profile = self.profiles.select(RunMode::for_job(job));
        if let Some(overlay) = &profile.low_memory {
            info!(
                "Host reports {:.1} GB, applying low-memory limits",
                overlay.host_memory_gb
            );
            if overlay.config.is_none() {
                warn!("No low-memory config overlay is configured; only clamping max_memory");
            }
        }

        let spec = self.commands.build(
            &manifest_path,
            &workspace.output_dir(),
            job.data_type,
            &profile,
            workspace.root(),
        );
        let log_path = workspace.log_path();
        let outcome = self.executor.execute(&spec, self.timeout, Some(&log_path))?;

        if !outcome.success() {
            return Err(ExecutionError::ExternalProcess {
                exit_code: outcome.exit_code,
                detail: outcome.failure_detail(),
            }
            .into());
        }
        Ok(outcome)
    }

    fn complete(
        &self,
        job: &Job,
        workspace: &JobWorkspace,
        outcome: &ProcessOutcome,
    ) -> Option<JobStatus> {
        let output_dir = workspace.output_dir();

        // Step 4: Optional composition summary
        {
            let _step = info_span!("summarize_composition").entered();
            let log_path = workspace.root().join("logs").join("composition.log");
            self.summarizer.summarize(&output_dir, Some(&log_path));
        }

        // Step 5: Harvest artifacts
        {
            let _step = info_span!("harvest").entered();
            let log_path = workspace.log_path();
            let result = self
                .harvester
                .harvest(&job.job_id, &output_dir, outcome, Some(&log_path));
            if let Err(e) = self.store.save_result(&result) {
                warn!(
                    "Job {} succeeded but its result could not be saved: {}",
                    job.job_id, e
                );
            }
        }

        match self.store.mark_completed(&job.job_id) {
            Ok(true) => Some(JobStatus::Completed),
            Ok(false) => {
                warn!("Job {} was no longer processing at completion", job.job_id);
                None
            }
            Err(e) => {
                error!("Failed to mark job {} as completed: {}", job.job_id, e);
                None
            }
        }
    }

    fn fail(&self, job_id: &str, cause: &str) {
        let cause = match cause.trim() {
            "" => UNKNOWN_FAILURE,
            trimmed => trimmed,
        };
        let message = sanitize::truncate_message(cause, self.error_message_limit);
        warn!("Job {} failed: {}", job_id, message);
        match self.store.mark_failed(job_id, &message) {
            Ok(true) => {}
            Ok(false) => warn!("Job {} was not processing; failure not recorded", job_id),
            Err(e) => error!("Failed to record failure of job {}: {}", job_id, e),
        }
    }
}
