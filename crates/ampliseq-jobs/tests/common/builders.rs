//! Builder for test configurations.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use ampliseq_jobs::config::{CompositionConfig, Config, TestDatasetConfig};

/// Builder for creating `Config` instances rooted in a test directory.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with small, fast settings for testing.
    pub fn new(data_directory: &Path) -> Self {
        let mut config = Config::with_data_directory(data_directory);
        config.worker_count = 2;
        config.pipeline.timeout_secs = 30;
        config.composition = CompositionConfig {
            interpreter: "sh".to_string(),
            script: PathBuf::from("/nonexistent/bacteria_composition.sh"),
            timeout_secs: 30,
        };
        Self { config }
    }

    /// Use `program` in place of `nextflow`.
    pub fn pipeline_program(mut self, program: &Path) -> Self {
        self.config.pipeline.program = program.to_string_lossy().into_owned();
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.pipeline.timeout_secs = secs;
        self
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.config.worker_count = count;
        self
    }

    pub fn composition_script(mut self, script: &Path) -> Self {
        self.config.composition.script = script.to_path_buf();
        self
    }

    pub fn test_dataset(mut self, directory: &Path) -> Self {
        self.config.test_dataset = TestDatasetConfig {
            directory: directory.to_path_buf(),
            ..TestDatasetConfig::default()
        };
        self
    }

    pub fn low_memory(mut self, threshold_gb: f64, overlay: Option<&Path>) -> Self {
        self.config.resources.low_memory_threshold_gb = threshold_gb;
        self.config.resources.low_memory_config = overlay.map(Path::to_path_buf);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
