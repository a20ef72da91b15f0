use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::job::SequencingLayout;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// Root of the blob store. Job areas live under `jobs/<job_id>/`.
    pub data_directory: PathBuf,
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Where pipeline runs execute. The composition script always runs locally.
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub resources: ResourcesConfig,
    #[serde(default)]
    pub composition: CompositionConfig,
    #[serde(default)]
    pub test_dataset: TestDatasetConfig,
}

impl Config {
    /// A config with every optional section at its default.
    pub fn with_data_directory<P: AsRef<Path>>(data_directory: P) -> Self {
        Self {
            version: "1.0".to_string(),
            data_directory: data_directory.as_ref().to_path_buf(),
            database_path: None,
            worker_count: default_worker_count(),
            pipeline: PipelineConfig::default(),
            executor: ExecutorConfig::default(),
            resources: ResourcesConfig::default(),
            composition: CompositionConfig::default(),
            test_dataset: TestDatasetConfig::default(),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| crate::db::default_database_path(&self.data_directory))
    }
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_true() -> bool {
    true
}

/// How the external pipeline is invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_pipeline")]
    pub pipeline: String,
    #[serde(default = "default_revision")]
    pub revision: String,
    #[serde(default = "default_container_profile")]
    pub container_profile: String,
    #[serde(default = "default_forward_primer")]
    pub forward_primer: String,
    #[serde(default = "default_reverse_primer")]
    pub reverse_primer: String,
    #[serde(default = "default_reference_taxonomy")]
    pub reference_taxonomy: String,
    #[serde(default = "default_pipeline_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub resume: bool,
    /// Upper bound on the failure cause stored on a job, in characters.
    #[serde(default = "default_error_message_limit")]
    pub error_message_limit: usize,
}

impl PipelineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_program() -> String {
    "nextflow".to_string()
}

fn default_pipeline() -> String {
    "nf-core/ampliseq".to_string()
}

fn default_revision() -> String {
    "2.11.0".to_string()
}

fn default_container_profile() -> String {
    "docker".to_string()
}

// 16S V3-V4 primer pair (341F / 805R).
fn default_forward_primer() -> String {
    "CCTACGGGNGGCWGCAG".to_string()
}

fn default_reverse_primer() -> String {
    "GACTACHVGGGTATCTAATCC".to_string()
}

fn default_reference_taxonomy() -> String {
    "silva=138".to_string()
}

fn default_pipeline_timeout() -> u64 {
    3600
}

fn default_error_message_limit() -> usize {
    500
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            pipeline: default_pipeline(),
            revision: default_revision(),
            container_profile: default_container_profile(),
            forward_primer: default_forward_primer(),
            reverse_primer: default_reverse_primer(),
            reference_taxonomy: default_reference_taxonomy(),
            timeout_secs: default_pipeline_timeout(),
            resume: true,
            error_message_limit: default_error_message_limit(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutorConfig {
    /// Child process on this host.
    #[default]
    Local,
    /// AWS Batch job. The job definition must mount the data directory at
    /// the same path as this host.
    Batch(BatchConfig),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    pub job_queue: String,
    pub job_definition: String,
    /// Falls back to the standard AWS region resolution when unset.
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl BatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

fn default_poll_interval() -> u64 {
    30
}

/// CPU and memory ceilings handed to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub max_cpus: u32,
    pub max_memory_gb: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesConfig {
    #[serde(default = "default_full_limits")]
    pub full: ResourceLimits,
    #[serde(default = "default_reduced_limits")]
    pub reduced: ResourceLimits,
    /// Stage-skip flags added for test-dataset runs.
    #[serde(default = "default_reduced_skip_flags")]
    pub reduced_skip_flags: Vec<String>,
    #[serde(default = "default_low_memory_threshold")]
    pub low_memory_threshold_gb: f64,
    /// Nextflow config overlay applied on hosts below the threshold.
    #[serde(default)]
    pub low_memory_config: Option<PathBuf>,
}

fn default_full_limits() -> ResourceLimits {
    ResourceLimits {
        max_cpus: u32::try_from(num_cpus::get()).unwrap_or(4),
        max_memory_gb: 16,
    }
}

fn default_reduced_limits() -> ResourceLimits {
    ResourceLimits {
        max_cpus: 2,
        max_memory_gb: 6,
    }
}

fn default_reduced_skip_flags() -> Vec<String> {
    [
        "--skip_fastqc",
        "--skip_alpha_rarefaction",
        "--skip_ancom",
        "--skip_multiqc",
        "--skip_report",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_low_memory_threshold() -> f64 {
    8.0
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            full: default_full_limits(),
            reduced: default_reduced_limits(),
            reduced_skip_flags: default_reduced_skip_flags(),
            low_memory_threshold_gb: default_low_memory_threshold(),
            low_memory_config: None,
        }
    }
}

/// The optional post-run composition summarizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositionConfig {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default = "default_composition_script")]
    pub script: PathBuf,
    #[serde(default = "default_composition_timeout")]
    pub timeout_secs: u64,
}

impl CompositionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_composition_script() -> PathBuf {
    PathBuf::from("scripts/bacteria_composition.py")
}

fn default_composition_timeout() -> u64 {
    600
}

impl Default for CompositionConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            script: default_composition_script(),
            timeout_secs: default_composition_timeout(),
        }
    }
}

/// The canned dataset copied in for test-mode submissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestDatasetConfig {
    #[serde(default = "default_test_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_single_end_files")]
    pub single_end: Vec<String>,
    #[serde(default = "default_paired_end_files")]
    pub paired_end: Vec<String>,
}

impl TestDatasetConfig {
    /// Source paths of the canned files for a layout.
    pub fn files_for(&self, layout: SequencingLayout) -> Vec<PathBuf> {
        let names = match layout {
            SequencingLayout::SingleEnd => &self.single_end,
            SequencingLayout::PairedEnd => &self.paired_end,
        };
        names.iter().map(|n| self.directory.join(n)).collect()
    }
}

fn default_test_directory() -> PathBuf {
    PathBuf::from("test_data")
}

fn default_single_end_files() -> Vec<String> {
    vec!["sample_R1.fastq.gz".to_string()]
}

fn default_paired_end_files() -> Vec<String> {
    vec![
        "sample_R1.fastq.gz".to_string(),
        "sample_R2.fastq.gz".to_string(),
    ]
}

impl Default for TestDatasetConfig {
    fn default() -> Self {
        Self {
            directory: default_test_directory(),
            single_end: default_single_end_files(),
            paired_end: default_paired_end_files(),
        }
    }
}
