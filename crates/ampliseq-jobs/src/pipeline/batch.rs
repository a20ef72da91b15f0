//! Pipeline runs submitted to AWS Batch.
//!
//! The run is handed to a job queue instead of a child process. The executor
//! polls the job until it reaches `SUCCEEDED` or `FAILED` and terminates it
//! once the time budget is spent. Outputs land in the shared data directory,
//! so harvesting works the same as for local runs.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use aws_sdk_batch::error::DisplayErrorContext;
use aws_sdk_batch::types::{ContainerOverrides, KeyValuePair};

use crate::config::BatchConfig;
use crate::error::ExecutionError;

use super::command::ProcessSpec;
use super::executor::{write_log, PipelineExecutor, ProcessOutcome};

/// Reason recorded on jobs cancelled for running too long.
const TIMEOUT_REASON: &str = "Exceeded the pipeline time budget";

/// Everything needed for one `SubmitJob` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSubmission {
    pub job_name: String,
    pub job_queue: String,
    pub job_definition: String,
    /// Container command: program followed by its arguments.
    pub command: Vec<String>,
    pub environment: Vec<(String, String)>,
}

impl BatchSubmission {
    pub fn from_spec(spec: &ProcessSpec, config: &BatchConfig) -> Self {
        let run_id = spec
            .working_dir
            .as_deref()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "run".to_string());

        let mut command = Vec::with_capacity(spec.args.len() + 1);
        command.push(spec.program.clone());
        command.extend(spec.args.iter().cloned());

        let mut environment = vec![("JOB_ID".to_string(), run_id.clone())];
        if let Some(dir) = &spec.working_dir {
            environment.push((
                "AMPLISEQ_WORKING_DIR".to_string(),
                dir.to_string_lossy().into_owned(),
            ));
        }

        Self {
            job_name: batch_job_name(&run_id),
            job_queue: config.job_queue.clone(),
            job_definition: config.job_definition.clone(),
            command,
            environment,
        }
    }
}

/// Batch job names allow letters, digits, hyphens and underscores, at most
/// 128 characters.
fn batch_job_name(run_id: &str) -> String {
    let cleaned: String = run_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let mut name = format!("nextflow-{}", cleaned);
    name.truncate(128);
    name
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    Submitted,
    Pending,
    Runnable,
    Starting,
    Running,
    Succeeded,
    Failed,
}

impl BatchPhase {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SUBMITTED" => Some(Self::Submitted),
            "PENDING" => Some(Self::Pending),
            "RUNNABLE" => Some(Self::Runnable),
            "STARTING" => Some(Self::Starting),
            "RUNNING" => Some(Self::Running),
            "SUCCEEDED" => Some(Self::Succeeded),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "SUBMITTED",
            Self::Pending => "PENDING",
            Self::Runnable => "RUNNABLE",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for BatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What `DescribeJobs` reported about one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJobState {
    pub phase: BatchPhase,
    pub status_reason: Option<String>,
    pub exit_code: Option<i32>,
    pub log_stream: Option<String>,
}

/// The three Batch API calls the executor needs.
pub trait BatchClient: Send + Sync {
    /// Returns the Batch job id.
    fn submit(&self, submission: &BatchSubmission) -> Result<String, ExecutionError>;

    /// `None` while the job is not visible yet.
    fn describe(&self, batch_job_id: &str) -> Result<Option<BatchJobState>, ExecutionError>;

    fn terminate(&self, batch_job_id: &str, reason: &str) -> Result<(), ExecutionError>;
}

/// Runs pipelines as AWS Batch jobs.
pub struct BatchExecutor {
    client: Arc<dyn BatchClient>,
    config: BatchConfig,
    poll_interval: Duration,
}

impl BatchExecutor {
    pub fn new(client: Arc<dyn BatchClient>, config: BatchConfig) -> Self {
        let poll_interval = config.poll_interval();
        Self {
            client,
            config,
            poll_interval,
        }
    }

    /// Overrides the configured polling period.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn outcome(
        &self,
        batch_job_id: &str,
        state: &BatchJobState,
        history: &[String],
        started: Instant,
    ) -> ProcessOutcome {
        let exit_code = match state.phase {
            BatchPhase::Succeeded => Some(state.exit_code.unwrap_or(0)),
            _ => state.exit_code.filter(|code| *code != 0),
        };

        let mut stderr = String::new();
        if state.phase == BatchPhase::Failed {
            stderr = state
                .status_reason
                .clone()
                .filter(|reason| !reason.trim().is_empty())
                .unwrap_or_else(|| format!("Batch job {} failed", batch_job_id));
        }

        let mut stdout = history.join("\n");
        if let Some(stream) = &state.log_stream {
            stdout.push_str(&format!("\nlog stream: {}", stream));
        }

        ProcessOutcome {
            exit_code,
            stdout,
            stderr,
            elapsed: started.elapsed(),
        }
    }
}

impl PipelineExecutor for BatchExecutor {
    fn execute(
        &self,
        spec: &ProcessSpec,
        timeout: Duration,
        log_path: Option<&Path>,
    ) -> Result<ProcessOutcome, ExecutionError> {
        let started = Instant::now();
        let submission = BatchSubmission::from_spec(spec, &self.config);
        let batch_job_id = self.client.submit(&submission)?;
        log::info!(
            "Submitted {} to queue {} as Batch job {}",
            submission.job_name,
            submission.job_queue,
            batch_job_id
        );

        let mut history = vec![format!("batch job {}", batch_job_id)];
        let mut last_phase = None;

        loop {
            match self.client.describe(&batch_job_id) {
                Ok(Some(state)) => {
                    if last_phase != Some(state.phase) {
                        log::info!("Batch job {} is {}", batch_job_id, state.phase);
                        history.push(format!(
                            "{:>6.1}s {}",
                            started.elapsed().as_secs_f64(),
                            state.phase
                        ));
                        last_phase = Some(state.phase);
                    }
                    if state.phase.is_terminal() {
                        let outcome = self.outcome(&batch_job_id, &state, &history, started);
                        if let Some(path) = log_path {
                            write_log(path, spec, &outcome, false);
                        }
                        return Ok(outcome);
                    }
                }
                Ok(None) => log::debug!("Batch job {} not visible yet", batch_job_id),
                Err(e) => log::warn!("Polling Batch job {} failed: {}", batch_job_id, e),
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                log::warn!(
                    "Batch job {} exceeded {}s, terminating",
                    batch_job_id,
                    timeout.as_secs()
                );
                if let Err(e) = self.client.terminate(&batch_job_id, TIMEOUT_REASON) {
                    log::warn!("Failed to terminate Batch job {}: {}", batch_job_id, e);
                }
                if let Some(path) = log_path {
                    let outcome = ProcessOutcome {
                        exit_code: None,
                        stdout: history.join("\n"),
                        stderr: String::new(),
                        elapsed: started.elapsed(),
                    };
                    write_log(path, spec, &outcome, true);
                }
                return Err(ExecutionError::Timeout { limit: timeout });
            }

            std::thread::sleep(self.poll_interval.min(timeout - elapsed));
        }
    }
}

// SDK accessors return `&T` for required members and `Option<&T>` otherwise.
fn present<'a, T: ?Sized>(value: impl Into<Option<&'a T>>) -> Option<&'a T> {
    value.into()
}

fn sdk_error<E>(operation: &'static str, error: E) -> ExecutionError
where
    E: std::error::Error,
{
    ExecutionError::Batch {
        operation,
        message: DisplayErrorContext(error).to_string(),
    }
}

/// [`BatchClient`] backed by the AWS SDK.
///
/// Owns a small runtime for the SDK's async calls; build it once per process
/// and share it, never from inside another runtime.
pub struct AwsBatchClient {
    client: aws_sdk_batch::Client,
    runtime: tokio::runtime::Runtime,
}

impl AwsBatchClient {
    /// Resolves credentials and region the standard AWS way.
    pub fn connect(region: Option<&str>) -> Result<Self, ExecutionError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("batch-client")
            .enable_all()
            .build()
            .map_err(ExecutionError::Runtime)?;

        let region = region.map(|r| aws_sdk_batch::config::Region::new(r.to_string()));
        let sdk_config = runtime.block_on(async {
            let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
            if let Some(region) = region {
                loader = loader.region(region);
            }
            loader.load().await
        });

        Ok(Self {
            client: aws_sdk_batch::Client::new(&sdk_config),
            runtime,
        })
    }
}

impl BatchClient for AwsBatchClient {
    fn submit(&self, submission: &BatchSubmission) -> Result<String, ExecutionError> {
        let environment = submission
            .environment
            .iter()
            .map(|(name, value)| KeyValuePair::builder().name(name).value(value).build())
            .collect();
        let overrides = ContainerOverrides::builder()
            .set_command(Some(submission.command.clone()))
            .set_environment(Some(environment))
            .build();

        let output = self
            .runtime
            .block_on(
                self.client
                    .submit_job()
                    .job_name(&submission.job_name)
                    .job_queue(&submission.job_queue)
                    .job_definition(&submission.job_definition)
                    .container_overrides(overrides)
                    .send(),
            )
            .map_err(|e| sdk_error("submit", e))?;

        present::<str>(output.job_id())
            .map(str::to_string)
            .ok_or_else(|| ExecutionError::Batch {
                operation: "submit",
                message: "response carried no job id".to_string(),
            })
    }

    fn describe(&self, batch_job_id: &str) -> Result<Option<BatchJobState>, ExecutionError> {
        let output = self
            .runtime
            .block_on(self.client.describe_jobs().jobs(batch_job_id).send())
            .map_err(|e| sdk_error("describe", e))?;

        let jobs = present::<[aws_sdk_batch::types::JobDetail]>(output.jobs()).unwrap_or(&[]);
        let Some(detail) = jobs.first() else {
            return Ok(None);
        };
        let Some(status) = present::<aws_sdk_batch::types::JobStatus>(detail.status()) else {
            return Ok(None);
        };
        let phase = BatchPhase::parse(status.as_str()).ok_or_else(|| ExecutionError::Batch {
            operation: "describe",
            message: format!("unknown job status '{}'", status.as_str()),
        })?;

        let container = detail.container();
        Ok(Some(BatchJobState {
            phase,
            status_reason: present::<str>(detail.status_reason()).map(str::to_string),
            exit_code: container.and_then(|c| c.exit_code()),
            log_stream: container
                .and_then(|c| c.log_stream_name())
                .map(str::to_string),
        }))
    }

    fn terminate(&self, batch_job_id: &str, reason: &str) -> Result<(), ExecutionError> {
        self.runtime
            .block_on(
                self.client
                    .terminate_job()
                    .job_id(batch_job_id)
                    .reason(reason)
                    .send(),
            )
            .map_err(|e| sdk_error("terminate", e))?;
        log::info!("Terminated Batch job {}", batch_job_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Serves a scripted sequence of describe results.
    #[derive(Default)]
    struct FakeBatch {
        states: Mutex<VecDeque<Result<Option<BatchJobState>, ExecutionError>>>,
        submitted: Mutex<Vec<BatchSubmission>>,
        terminated: Mutex<Vec<(String, String)>>,
        reject_submit: bool,
    }

    impl FakeBatch {
        fn with_phases(phases: &[BatchPhase]) -> Arc<Self> {
            let fake = Self::default();
            for phase in phases {
                fake.states.lock().unwrap().push_back(Ok(Some(state(*phase))));
            }
            Arc::new(fake)
        }

        fn push(&self, result: Result<Option<BatchJobState>, ExecutionError>) {
            self.states.lock().unwrap().push_back(result);
        }
    }

    impl BatchClient for FakeBatch {
        fn submit(&self, submission: &BatchSubmission) -> Result<String, ExecutionError> {
            if self.reject_submit {
                return Err(ExecutionError::Batch {
                    operation: "submit",
                    message: "queue is disabled".to_string(),
                });
            }
            self.submitted.lock().unwrap().push(submission.clone());
            Ok("b-123".to_string())
        }

        fn describe(&self, _id: &str) -> Result<Option<BatchJobState>, ExecutionError> {
            // Once the script runs out the job just keeps running.
            self.states
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Some(state(BatchPhase::Running))))
        }

        fn terminate(&self, id: &str, reason: &str) -> Result<(), ExecutionError> {
            self.terminated
                .lock()
                .unwrap()
                .push((id.to_string(), reason.to_string()));
            Ok(())
        }
    }

    fn state(phase: BatchPhase) -> BatchJobState {
        BatchJobState {
            phase,
            status_reason: None,
            exit_code: None,
            log_stream: None,
        }
    }

    fn config() -> BatchConfig {
        BatchConfig {
            job_queue: "microbiome-job-queue".to_string(),
            job_definition: "nextflow-ampliseq".to_string(),
            region: None,
            poll_interval_secs: 30,
        }
    }

    fn executor(client: Arc<FakeBatch>) -> BatchExecutor {
        BatchExecutor::new(client, config()).with_poll_interval(Duration::from_millis(5))
    }

    fn spec() -> ProcessSpec {
        ProcessSpec::new("nextflow")
            .args(["run", "nf-core/ampliseq", "--outdir", "/data/jobs/job-42/results"])
            .current_dir("/data/jobs/job-42")
    }

    #[test]
    fn test_submission_carries_command_and_job_identity() {
        let submission = BatchSubmission::from_spec(&spec(), &config());
        assert_eq!(submission.job_name, "nextflow-job-42");
        assert_eq!(submission.job_queue, "microbiome-job-queue");
        assert_eq!(submission.job_definition, "nextflow-ampliseq");
        assert_eq!(submission.command[0], "nextflow");
        assert_eq!(submission.command.last().unwrap(), "/data/jobs/job-42/results");
        assert!(submission
            .environment
            .contains(&("JOB_ID".to_string(), "job-42".to_string())));
        assert!(submission.environment.contains(&(
            "AMPLISEQ_WORKING_DIR".to_string(),
            "/data/jobs/job-42".to_string()
        )));
    }

    #[test]
    fn test_job_name_is_sanitized_and_bounded() {
        assert_eq!(batch_job_name("a.b c"), "nextflow-a_b_c");
        assert_eq!(batch_job_name(&"x".repeat(300)).len(), 128);
    }

    #[test]
    fn test_phase_parsing() {
        assert_eq!(BatchPhase::parse("RUNNABLE"), Some(BatchPhase::Runnable));
        assert_eq!(BatchPhase::parse("running"), None);
        assert!(BatchPhase::Failed.is_terminal());
        assert!(!BatchPhase::Starting.is_terminal());
    }

    #[test]
    fn test_polls_until_succeeded() {
        let fake = FakeBatch::with_phases(&[
            BatchPhase::Submitted,
            BatchPhase::Runnable,
            BatchPhase::Running,
            BatchPhase::Succeeded,
        ]);
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("logs").join("pipeline.log");

        let outcome = executor(fake.clone())
            .execute(&spec(), Duration::from_secs(10), Some(&log))
            .unwrap();

        assert!(outcome.success());
        assert_eq!(fake.submitted.lock().unwrap().len(), 1);
        assert!(fake.terminated.lock().unwrap().is_empty());
        assert!(outcome.stdout.contains("RUNNABLE"));

        let written = std::fs::read_to_string(&log).unwrap();
        assert!(written.contains("batch job b-123"));
        assert!(written.contains("SUCCEEDED"));
    }

    #[test]
    fn test_failed_job_reports_status_reason() {
        let fake = FakeBatch::with_phases(&[BatchPhase::Running]);
        fake.push(Ok(Some(BatchJobState {
            phase: BatchPhase::Failed,
            status_reason: Some("Essential container in task exited".to_string()),
            exit_code: Some(1),
            log_stream: Some("nextflow/default/abc".to_string()),
        })));

        let outcome = executor(fake)
            .execute(&spec(), Duration::from_secs(10), None)
            .unwrap();

        assert!(!outcome.success());
        assert_eq!(outcome.exit_code, Some(1));
        assert_eq!(outcome.failure_detail(), "Essential container in task exited");
        assert!(outcome.stdout.contains("nextflow/default/abc"));
    }

    #[test]
    fn test_failed_job_without_reason_or_exit_code() {
        let fake = FakeBatch::with_phases(&[BatchPhase::Failed]);
        let outcome = executor(fake)
            .execute(&spec(), Duration::from_secs(10), None)
            .unwrap();

        assert_eq!(outcome.exit_code, None);
        assert!(!outcome.success());
        assert_eq!(outcome.failure_detail(), "Batch job b-123 failed");
    }

    #[test]
    fn test_poll_errors_are_retried() {
        let fake = Arc::new(FakeBatch::default());
        fake.push(Err(ExecutionError::Batch {
            operation: "describe",
            message: "throttled".to_string(),
        }));
        fake.push(Ok(None));
        fake.push(Ok(Some(state(BatchPhase::Succeeded))));

        let outcome = executor(fake)
            .execute(&spec(), Duration::from_secs(10), None)
            .unwrap();
        assert!(outcome.success());
    }

    #[test]
    fn test_timeout_terminates_job() {
        let fake = Arc::new(FakeBatch::default());
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("pipeline.log");

        let err = executor(fake.clone())
            .execute(&spec(), Duration::from_millis(50), Some(&log))
            .unwrap_err();

        assert!(err.is_timeout());
        let terminated = fake.terminated.lock().unwrap();
        assert_eq!(
            terminated.as_slice(),
            &[("b-123".to_string(), TIMEOUT_REASON.to_string())]
        );
        assert!(std::fs::read_to_string(&log).unwrap().contains("timed out"));
    }

    #[test]
    fn test_rejected_submission_is_an_error() {
        let fake = Arc::new(FakeBatch {
            reject_submit: true,
            ..Default::default()
        });
        let err = executor(fake.clone())
            .execute(&spec(), Duration::from_secs(10), None)
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Batch submit request failed: queue is disabled"
        );
        assert!(fake.terminated.lock().unwrap().is_empty());
    }

    #[test]
    fn test_spec_without_working_dir_gets_generic_name() {
        let spec = ProcessSpec::new("nextflow").arg("run");
        let submission = BatchSubmission::from_spec(&spec, &config());
        assert_eq!(submission.job_name, "nextflow-run");
        assert_eq!(submission.environment.len(), 1);
    }
}
