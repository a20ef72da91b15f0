//! Running external processes with a wall-clock ceiling.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

use crate::error::ExecutionError;
use crate::sanitize;

use super::command::ProcessSpec;

/// How long to keep reading output after the process is gone. A killed
/// pipeline can leave grandchildren holding the pipes open; whatever was
/// read by then is kept.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// What a finished process left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Human-readable failure detail: stderr if any, else the stdout tail.
    pub fn failure_detail(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let tail = sanitize::tail_lines(self.stdout.trim(), 20);
        if !tail.is_empty() {
            return tail;
        }
        match self.exit_code {
            Some(code) => format!("process exited with status {}", code),
            None => "process terminated by signal".to_string(),
        }
    }
}

/// Runs a process to completion or until the timeout expires.
pub trait PipelineExecutor: Send + Sync {
    /// `log_path`, when given, receives the combined output whether the run
    /// succeeds, fails or times out.
    fn execute(
        &self,
        spec: &ProcessSpec,
        timeout: Duration,
        log_path: Option<&Path>,
    ) -> Result<ProcessOutcome, ExecutionError>;
}

/// Executes processes on the local host via `tokio::process`.
///
/// Each call owns a current-thread runtime, so the blocking wait happens on
/// the caller's thread and nothing is shared between runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalProcessExecutor;

impl LocalProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl PipelineExecutor for LocalProcessExecutor {
    fn execute(
        &self,
        spec: &ProcessSpec,
        timeout: Duration,
        log_path: Option<&Path>,
    ) -> Result<ProcessOutcome, ExecutionError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ExecutionError::Runtime)?;

        runtime.block_on(run_process(spec, timeout, log_path))
    }
}

async fn run_process(
    spec: &ProcessSpec,
    timeout: Duration,
    log_path: Option<&Path>,
) -> Result<ProcessOutcome, ExecutionError> {
    let started = Instant::now();

    let mut command = tokio::process::Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.working_dir {
        command.current_dir(dir);
    }

    log::info!("Launching: {}", spec);
    let mut child = command.spawn().map_err(|e| ExecutionError::Launch {
        program: spec.program.clone(),
        source: e,
    })?;

    let stdout_reader = OutputReader::spawn(child.stdout.take());
    let stderr_reader = OutputReader::spawn(child.stderr.take());

    let exit = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => return Err(ExecutionError::Wait(e)),
        Err(_) => {
            log::warn!(
                "{} exceeded {}s, terminating",
                spec.program,
                timeout.as_secs()
            );
            if let Err(e) = child.kill().await {
                log::warn!("Failed to kill {}: {}", spec.program, e);
            }
            None
        }
    };

    let (stdout, stderr) = tokio::join!(
        stdout_reader.finish(DRAIN_GRACE),
        stderr_reader.finish(DRAIN_GRACE)
    );

    let outcome = ProcessOutcome {
        exit_code: exit.and_then(|status| status.code()),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        elapsed: started.elapsed(),
    };

    if let Some(path) = log_path {
        write_log(path, spec, &outcome, exit.is_none());
    }

    match exit {
        None => Err(ExecutionError::Timeout { limit: timeout }),
        Some(_) => {
            log::info!(
                "{} finished with {:?} after {:.1}s",
                spec.program,
                outcome.exit_code,
                outcome.elapsed.as_secs_f64()
            );
            Ok(outcome)
        }
    }
}

/// Copies one output pipe into a buffer shared with the caller.
struct OutputReader {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl OutputReader {
    fn spawn<R>(stream: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let task = tokio::spawn(async move {
            let Some(mut stream) = stream else {
                return;
            };
            let mut chunk = [0u8; 8192];
            loop {
                match stream.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => lock_buffer(&sink).extend_from_slice(&chunk[..n]),
                    Err(e) => {
                        log::warn!("Failed to read process output: {}", e);
                        break;
                    }
                }
            }
        });
        Self { buffer, task }
    }

    /// Waits up to `grace` for end of stream, then returns everything read.
    async fn finish(self, grace: Duration) -> Vec<u8> {
        let Self { buffer, mut task } = self;
        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("Output reader task failed: {}", e),
            Err(_) => {
                log::warn!("Process output still open after exit, keeping what was read");
                task.abort();
            }
        }
        let mut captured = lock_buffer(&buffer);
        std::mem::take(&mut *captured)
    }
}

fn lock_buffer(buffer: &Mutex<Vec<u8>>) -> MutexGuard<'_, Vec<u8>> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(super) fn write_log(
    path: &Path,
    spec: &ProcessSpec,
    outcome: &ProcessOutcome,
    timed_out: bool,
) {
    let status = if timed_out {
        "timed out".to_string()
    } else {
        format!("exit code {:?}", outcome.exit_code)
    };
    let content = format!(
        "$ {}\n# {} after {:.1}s\n\n--- stdout ---\n{}\n--- stderr ---\n{}\n",
        spec,
        status,
        outcome.elapsed.as_secs_f64(),
        outcome.stdout,
        outcome.stderr
    );

    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            log::warn!("Failed to create log directory {}: {}", parent.display(), e);
            return;
        }
    }
    if let Err(e) = std::fs::write(path, content) {
        log::warn!("Failed to write pipeline log {}: {}", path.display(), e);
    }
}
