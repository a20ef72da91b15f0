use std::path::{Path, PathBuf};

use crate::config::schema::{Config, ExecutorConfig};
use crate::error::ConfigError;

/// Matches the schema's `error_message_limit` minimum.
pub const MIN_ERROR_MESSAGE_LIMIT: usize = 16;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

/// Config file used when none is given: `<config dir>/ampliseq-jobs/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("ampliseq-jobs").join("config.json"))
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.data_directory.as_os_str().is_empty() {
        return Err(ConfigError::Validation {
            message: "data_directory must not be empty".to_string(),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be at least 1".to_string(),
        });
    }

    let pipeline = &config.pipeline;
    if pipeline.timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "pipeline.timeout_secs must be at least 1".to_string(),
        });
    }
    if pipeline.error_message_limit < MIN_ERROR_MESSAGE_LIMIT {
        return Err(ConfigError::Validation {
            message: format!(
                "pipeline.error_message_limit must be at least {}",
                MIN_ERROR_MESSAGE_LIMIT
            ),
        });
    }
    if pipeline.forward_primer.is_empty() || pipeline.reverse_primer.is_empty() {
        return Err(ConfigError::Validation {
            message: "Both primers must be set".to_string(),
        });
    }

    if let ExecutorConfig::Batch(batch) = &config.executor {
        if batch.job_queue.trim().is_empty() || batch.job_definition.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "executor.job_queue and executor.job_definition must be set".to_string(),
            });
        }
        if batch.poll_interval_secs == 0 {
            return Err(ConfigError::Validation {
                message: "executor.poll_interval_secs must be at least 1".to_string(),
            });
        }
    }

    let resources = &config.resources;
    for (name, limits) in [("full", resources.full), ("reduced", resources.reduced)] {
        if limits.max_cpus == 0 || limits.max_memory_gb == 0 {
            return Err(ConfigError::Validation {
                message: format!("resources.{} limits must be at least 1", name),
            });
        }
    }
    if !resources.low_memory_threshold_gb.is_finite() || resources.low_memory_threshold_gb < 0.0
    {
        return Err(ConfigError::Validation {
            message: format!(
                "Invalid low_memory_threshold_gb: {}",
                resources.low_memory_threshold_gb
            ),
        });
    }
    if resources.reduced.max_memory_gb > resources.full.max_memory_gb {
        log::warn!(
            "Reduced resource profile ({} GB) is larger than the full profile ({} GB)",
            resources.reduced.max_memory_gb,
            resources.full.max_memory_gb
        );
    }

    if config.composition.timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "composition.timeout_secs must be at least 1".to_string(),
        });
    }

    if config.test_dataset.single_end.len() != 1 {
        return Err(ConfigError::Validation {
            message: "test_dataset.single_end must name exactly one file".to_string(),
        });
    }
    if config.test_dataset.paired_end.len() < 2 {
        return Err(ConfigError::Validation {
            message: "test_dataset.paired_end must name a read 1 and a read 2 file".to_string(),
        });
    }

    Ok(())
}
