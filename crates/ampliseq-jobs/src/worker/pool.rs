use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use crate::error::DispatchError;
use crate::job::JobStatus;
use crate::pipeline::Supervisor;

/// Hands a job identity to a background execution context.
pub trait Dispatcher: Send + Sync {
    /// Must return without waiting for the run.
    fn dispatch(&self, job_id: &str) -> Result<(), DispatchError>;
}

/// Emitted by a worker once a run has ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub job_id: String,
    /// Terminal status recorded by the run; `None` if it never started.
    pub status: Option<JobStatus>,
}

type ActiveSet = Arc<Mutex<HashSet<String>>>;

fn lock_active(active: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    match active.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            warn!("Active job set lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Fixed set of threads running [`Supervisor`] jobs from a queue.
pub struct WorkerPool {
    job_sender: Sender<String>,
    report_receiver: Receiver<RunReport>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    /// Job identities queued or running.
    active: ActiveSet,
}

impl WorkerPool {
    pub fn new(supervisor: Arc<Supervisor>, worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        // The queue holds only identities; jobs wait in it as `pending`.
        let (job_sender, jobs) = unbounded::<String>();
        let (reports, report_receiver) = bounded::<RunReport>(worker_count * 16);
        let shutdown = Arc::new(AtomicBool::new(false));
        let active: ActiveSet = Arc::default();

        let workers = (0..worker_count)
            .map(|id| {
                let worker = Worker {
                    id,
                    jobs: jobs.clone(),
                    reports: reports.clone(),
                    shutdown: Arc::clone(&shutdown),
                    supervisor: Arc::clone(&supervisor),
                    active: Arc::clone(&active),
                };
                thread::spawn(move || worker.run())
            })
            .collect();

        info!("Worker pool running with {} thread(s)", worker_count);

        Self {
            job_sender,
            report_receiver,
            workers,
            shutdown,
            active,
        }
    }

    /// Number of jobs queued or running.
    pub fn active_count(&self) -> usize {
        lock_active(&self.active).len()
    }

    pub fn is_active(&self, job_id: &str) -> bool {
        lock_active(&self.active).contains(job_id)
    }

    pub fn try_recv_report(&self) -> Option<RunReport> {
        self.report_receiver.try_recv().ok()
    }

    pub fn recv_report_timeout(&self, timeout: Duration) -> Option<RunReport> {
        self.report_receiver.recv_timeout(timeout).ok()
    }

    /// Stops workers after their current run. Queued jobs stay `pending`.
    pub fn shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            info!("Worker pool stopping, {} job(s) still active", self.active_count());
        }
    }

    /// Joins every worker thread.
    pub fn wait(self) {
        let Self {
            job_sender,
            workers,
            ..
        } = self;
        drop(job_sender);

        let mut crashed = 0;
        for handle in workers {
            if handle.join().is_err() {
                crashed += 1;
            }
        }
        if crashed > 0 {
            error!("{} worker thread(s) ended by panic", crashed);
        }
        info!("Worker pool stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl Dispatcher for WorkerPool {
    fn dispatch(&self, job_id: &str) -> Result<(), DispatchError> {
        if self.is_shutdown() {
            return Err(DispatchError::ChannelClosed);
        }

        if !lock_active(&self.active).insert(job_id.to_string()) {
            return Err(DispatchError::AlreadyActive(job_id.to_string()));
        }

        if self.job_sender.send(job_id.to_string()).is_err() {
            lock_active(&self.active).remove(job_id);
            return Err(DispatchError::ChannelClosed);
        }

        debug!("Queued job {}", job_id);
        Ok(())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct Worker {
    id: usize,
    jobs: Receiver<String>,
    reports: Sender<RunReport>,
    shutdown: Arc<AtomicBool>,
    supervisor: Arc<Supervisor>,
    active: ActiveSet,
}

impl Worker {
    fn run(self) {
        while !self.shutdown.load(Ordering::SeqCst) {
            match self.jobs.recv_timeout(Duration::from_millis(100)) {
                Ok(job_id) => self.execute(job_id),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("Worker {} exiting", self.id);
    }

    fn execute(&self, job_id: String) {
        debug!("Worker {} picked up job {}", self.id, job_id);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.supervisor.run(&job_id)));
        let status = outcome.unwrap_or_else(|payload| {
            let detail = panic_message(payload.as_ref());
            error!("Run of job {} panicked: {}", job_id, detail);
            self.supervisor.record_internal_error(&job_id, &detail);
            Some(JobStatus::Failed)
        });

        lock_active(&self.active).remove(&job_id);

        // Nobody has to listen for reports; drop them when the buffer is full.
        if let Err(e) = self.reports.try_send(RunReport { job_id, status }) {
            debug!("Report for job {} dropped", e.into_inner().job_id);
        }
    }
}
