use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Filesystem area owned by a single job: `<data_directory>/jobs/<job_id>/`.
///
/// Nothing outside this directory is written during a run, so two jobs
/// never touch the same files.
#[derive(Debug, Clone)]
pub struct JobWorkspace {
    job_id: String,
    root: PathBuf,
}

impl JobWorkspace {
    pub fn new(data_directory: &Path, job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            root: data_directory.join(Self::namespace(job_id)),
        }
    }

    /// Blob namespace of the whole job area.
    pub fn namespace(job_id: &str) -> String {
        format!("jobs/{}", job_id)
    }

    pub fn uploads_namespace(job_id: &str) -> String {
        format!("jobs/{}/uploads", job_id)
    }

    pub fn artifacts_namespace(job_id: &str) -> String {
        format!("jobs/{}/artifacts", job_id)
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the pipeline writes its results.
    pub fn output_dir(&self) -> PathBuf {
        self.root.join("results")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("samplesheet.csv")
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join("logs").join("pipeline.log")
    }

    /// Creates the directories a run writes into.
    pub fn prepare(&self) -> Result<(), StorageError> {
        for dir in [self.output_dir(), self.root.join("logs")] {
            std::fs::create_dir_all(&dir).map_err(|e| StorageError::CreateDirectory {
                path: dir.clone(),
                source: e,
            })?;
        }
        Ok(())
    }
}
