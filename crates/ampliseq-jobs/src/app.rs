//! Production wiring of the job service.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::config::{validate_config, Config, ExecutorConfig};
use crate::db::Database;
use crate::error::{ConfigError, Result, StorageError};
use crate::job::{JobStatus, StatusSnapshot};
use crate::pipeline::{
    AwsBatchClient, BatchExecutor, LocalProcessExecutor, MemoryProbe, PipelineExecutor, Supervisor,
};
use crate::service::JobService;
use crate::storage::{BlobStore, FileStorage};
use crate::store::{JobListFilter, JobStore};
use crate::worker::{Dispatcher, WorkerPool};

const INTERRUPTED_MESSAGE: &str = "Pipeline run was interrupted by a service restart";
const RECOVERY_PAGE: u64 = 100;

/// What [`App::recover`] did with jobs left over from an earlier process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub interrupted: usize,
    pub requeued: usize,
}

/// Every collaborator constructed once, for the life of the process.
pub struct App {
    service: JobService,
    store: JobStore,
    pool: Arc<WorkerPool>,
}

impl App {
    /// Builds the service with the executor named in `config.executor`.
    ///
    /// A Batch client is connected here, once, and shared by every run.
    pub fn from_config(config: &Config, probe: &dyn MemoryProbe) -> Result<Self> {
        let local: Arc<dyn PipelineExecutor> = Arc::new(LocalProcessExecutor::new());
        let pipeline: Arc<dyn PipelineExecutor> = match &config.executor {
            ExecutorConfig::Local => Arc::clone(&local),
            ExecutorConfig::Batch(batch) => {
                let client = AwsBatchClient::connect(batch.region.as_deref())?;
                info!(
                    "Pipeline runs go to Batch queue {} ({})",
                    batch.job_queue, batch.job_definition
                );
                Arc::new(BatchExecutor::new(Arc::new(client), batch.clone()))
            }
        };
        Self::build(config, probe, pipeline, local)
    }

    /// Uses `executor` for the pipeline and the composition script alike.
    pub fn with_executor(
        config: &Config,
        probe: &dyn MemoryProbe,
        executor: Arc<dyn PipelineExecutor>,
    ) -> Result<Self> {
        Self::build(config, probe, Arc::clone(&executor), executor)
    }

    fn build(
        config: &Config,
        probe: &dyn MemoryProbe,
        executor: Arc<dyn PipelineExecutor>,
        summary_executor: Arc<dyn PipelineExecutor>,
    ) -> Result<Self> {
        validate_config(config)?;
        let data_directory = &config.data_directory;
        std::fs::create_dir_all(data_directory).map_err(|e| StorageError::CreateDirectory {
            path: data_directory.clone(),
            source: e,
        })?;
        // Manifest and workspace paths are handed to other processes.
        let data_directory =
            std::path::absolute(data_directory).map_err(|e| ConfigError::Validation {
                message: format!(
                    "Cannot resolve data directory '{}': {}",
                    data_directory.display(),
                    e
                ),
            })?;
        let config = Config {
            data_directory,
            ..config.clone()
        };

        let db = Database::open(&config.database_path())?;
        let store = JobStore::new(db);
        let storage = Arc::new(FileStorage::new(&config.data_directory));

        let capability = probe.capability();
        info!(
            "Host reports {:.1} GB of memory, {} worker(s)",
            capability.total_memory_gb(),
            config.worker_count
        );

        let blobs: Arc<dyn BlobStore> = storage.clone();
        let supervisor = Supervisor::new(&config, store.clone(), blobs, executor, capability)
            .with_summary_executor(summary_executor);
        let pool = Arc::new(WorkerPool::new(Arc::new(supervisor), config.worker_count));

        let dispatcher: Arc<dyn Dispatcher> = pool.clone();
        let service = JobService::new(
            store.clone(),
            storage,
            dispatcher,
            config.test_dataset.clone(),
        );

        Ok(Self {
            service,
            store,
            pool,
        })
    }

    pub fn service(&self) -> &JobService {
        &self.service
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Resolves jobs an earlier process left unfinished.
    ///
    /// `processing` jobs lost their run and are failed; `pending` jobs were
    /// never started and are dispatched again.
    pub fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for job_id in self.job_ids(JobStatus::Processing)? {
            if self.store.mark_failed(&job_id, INTERRUPTED_MESSAGE)? {
                warn!("Job {} was interrupted and is now failed", job_id);
                report.interrupted += 1;
            }
        }

        for job_id in self.job_ids(JobStatus::Pending)? {
            if self.pool.is_active(&job_id) {
                continue;
            }
            self.pool.dispatch(&job_id)?;
            report.requeued += 1;
        }

        if report.interrupted > 0 || report.requeued > 0 {
            info!(
                "Recovered jobs: {} interrupted, {} requeued",
                report.interrupted, report.requeued
            );
        }
        Ok(report)
    }

    /// Blocks until the job has no queued or running run, then returns its
    /// status.
    pub fn wait_for(&self, job_id: &str) -> Result<StatusSnapshot> {
        while self.pool.is_active(job_id) {
            self.pool.recv_report_timeout(Duration::from_millis(200));
        }
        self.service.get_status(job_id)
    }

    /// Blocks until every dispatched job has finished.
    pub fn wait_until_idle(&self) {
        while self.pool.active_count() > 0 {
            self.pool.recv_report_timeout(Duration::from_millis(200));
        }
    }

    /// Stops the workers. Jobs still queued stay `pending` for [`App::recover`].
    pub fn shutdown(self) {
        let Self { service, pool, .. } = self;
        pool.shutdown();
        drop(service);

        match Arc::try_unwrap(pool) {
            Ok(pool) => pool.wait(),
            Err(_) => warn!("Worker pool is still shared, not waiting for workers"),
        }
    }

    fn job_ids(&self, status: JobStatus) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.store.list(&JobListFilter {
                status: Some(status),
                limit: Some(RECOVERY_PAGE),
                offset: Some(offset),
            })?;
            let fetched = page.jobs.len() as u64;
            ids.extend(page.jobs.into_iter().map(|j| j.job_id));
            offset += fetched;
            if fetched < RECOVERY_PAGE || offset >= page.total {
                break;
            }
        }
        Ok(ids)
    }
}
