//! Genus-level composition summary.
//!
//! After a successful run an optional external script condenses the DADA2
//! tables into `bacteria_composition_summary.tsv`: tab separated, header
//! `Rank, Genus, Total_Reads, <sample...>`, one row per genus ranked by
//! total reads. This module runs that script and parses its table.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::config::CompositionConfig;

use super::command::ProcessSpec;
use super::executor::PipelineExecutor;

const FIXED_COLUMNS: [&str; 3] = ["Rank", "Genus", "Total_Reads"];

#[derive(Error, Debug)]
pub enum CompositionError {
    #[error("Failed to read composition table: {0}")]
    Parse(#[from] csv::Error),

    #[error("Composition table must start with columns Rank, Genus, Total_Reads")]
    InvalidHeader,

    #[error("Invalid {column} value '{value}' on line {line}")]
    InvalidValue {
        line: u64,
        column: String,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenusAbundance {
    pub rank: u32,
    pub genus: String,
    pub total_reads: u64,
    /// Fraction of all reads in the table, `0.0..=1.0`.
    pub share: f64,
    /// Read counts in the order of [`CompositionSummary::samples`].
    pub per_sample: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositionSummary {
    pub samples: Vec<String>,
    pub genera: Vec<GenusAbundance>,
    pub total_reads: u64,
}

fn parse_count(raw: &str, line: u64, column: &str) -> Result<u64, CompositionError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    trimmed.parse().map_err(|_| CompositionError::InvalidValue {
        line,
        column: column.to_string(),
        value: raw.to_string(),
    })
}

pub fn parse_composition_table(content: &[u8]) -> Result<CompositionSummary, CompositionError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_reader(content);

    let headers = reader.headers()?.clone();
    let header_ok = headers.len() >= FIXED_COLUMNS.len()
        && FIXED_COLUMNS
            .iter()
            .zip(headers.iter())
            .all(|(expected, actual)| *expected == actual.trim());
    if !header_ok {
        return Err(CompositionError::InvalidHeader);
    }
    let samples: Vec<String> = headers
        .iter()
        .skip(FIXED_COLUMNS.len())
        .map(|s| s.trim().to_string())
        .collect();

    let mut genera = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();

        let rank_raw = record.get(0).unwrap_or_default();
        let rank = rank_raw
            .trim()
            .parse()
            .map_err(|_| CompositionError::InvalidValue {
                line,
                column: "Rank".to_string(),
                value: rank_raw.to_string(),
            })?;
        let genus = match record.get(1).map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => "Unclassified".to_string(),
        };
        let total_reads = parse_count(record.get(2).unwrap_or_default(), line, "Total_Reads")?;

        let per_sample = samples
            .iter()
            .enumerate()
            .map(|(i, sample)| {
                parse_count(
                    record.get(FIXED_COLUMNS.len() + i).unwrap_or_default(),
                    line,
                    sample,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        genera.push(GenusAbundance {
            rank,
            genus,
            total_reads,
            share: 0.0,
            per_sample,
        });
    }

    let total_reads: u64 = genera.iter().map(|g| g.total_reads).sum();
    if total_reads > 0 {
        for genus in &mut genera {
            genus.share = genus.total_reads as f64 / total_reads as f64;
        }
    }
    genera.sort_by_key(|g| g.rank);

    Ok(CompositionSummary {
        samples,
        genera,
        total_reads,
    })
}

/// Runs the external composition script against a finished output directory.
pub struct CompositionSummarizer {
    config: CompositionConfig,
    executor: Arc<dyn PipelineExecutor>,
}

impl CompositionSummarizer {
    pub fn new(config: CompositionConfig, executor: Arc<dyn PipelineExecutor>) -> Self {
        Self { config, executor }
    }

    pub fn with_executor(self, executor: Arc<dyn PipelineExecutor>) -> Self {
        Self { executor, ..self }
    }

    /// Returns whether the script ran and reported success. Every failure
    /// here only means the composition artifacts will be missing.
    pub fn summarize(&self, output_dir: &Path, log_path: Option<&Path>) -> bool {
        let script = &self.config.script;
        if !script.is_file() {
            log::info!(
                "Composition script {} not found, skipping summary",
                script.display()
            );
            return false;
        }

        let spec = ProcessSpec::new(&self.config.interpreter)
            .arg(script.to_string_lossy())
            .arg(output_dir.to_string_lossy());

        match self.executor.execute(&spec, self.config.timeout(), log_path) {
            Ok(outcome) if outcome.success() => true,
            Ok(outcome) => {
                log::warn!(
                    "Composition script exited with {:?}: {}",
                    outcome.exit_code,
                    outcome.failure_detail()
                );
                false
            }
            Err(e) => {
                log::warn!("Composition script failed: {}", e);
                false
            }
        }
    }
}
