//! Collects pipeline outputs into the job's result record.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::job::{AnalysisResult, ArtifactKind, ExecutionEffort};
use crate::storage::{BlobStore, JobWorkspace};

use super::executor::ProcessOutcome;

const SUBMITTED_MARKER: &str = "Submitted process >";

static RE_DURATION_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*Duration\s*:\s*(.+?)\s*$").unwrap());
static RE_DURATION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*(ms|s|m|h|d)\b").unwrap());

/// Parses a Nextflow duration such as `1h 2m 3s` or `850ms` into seconds.
pub fn parse_nextflow_duration(text: &str) -> Option<f64> {
    let mut total = 0.0;
    let mut matched = false;
    for caps in RE_DURATION_TOKEN.captures_iter(text) {
        let value: f64 = caps[1].parse().ok()?;
        total += match &caps[2] {
            "ms" => value / 1000.0,
            "s" => value,
            "m" => value * 60.0,
            "h" => value * 3600.0,
            "d" => value * 86400.0,
            _ => return None,
        };
        matched = true;
    }
    matched.then_some(total)
}

/// Derives the execution effort from captured pipeline output.
///
/// `task_count` counts the tasks Nextflow reported as submitted; the
/// duration comes from the completion summary when one was printed.
pub fn measure_effort(output: &str) -> ExecutionEffort {
    let task_count = output
        .lines()
        .filter(|line| line.contains(SUBMITTED_MARKER))
        .count();

    let reported_duration_secs = RE_DURATION_LINE
        .captures_iter(output)
        .last()
        .and_then(|caps| parse_nextflow_duration(&caps[1]));

    ExecutionEffort {
        task_count: u32::try_from(task_count).unwrap_or(u32::MAX),
        reported_duration_secs,
    }
}

/// Finds the first existing candidate path of an artifact.
pub fn locate(output_dir: &Path, kind: ArtifactKind) -> Option<PathBuf> {
    kind.candidates()
        .iter()
        .map(|rel| output_dir.join(rel))
        .find(|path| path.is_file())
}

pub struct ResultHarvester {
    storage: Arc<dyn BlobStore>,
}

impl ResultHarvester {
    pub fn new(storage: Arc<dyn BlobStore>) -> Self {
        Self { storage }
    }

    /// Builds the result of a successful run.
    ///
    /// Missing artifacts are skipped. An artifact that exists but cannot be
    /// stored is logged and skipped; it never fails the run.
    pub fn harvest(
        &self,
        job_id: &str,
        output_dir: &Path,
        outcome: &ProcessOutcome,
        log_path: Option<&Path>,
    ) -> AnalysisResult {
        let mut result = AnalysisResult::new(job_id);
        let namespace = JobWorkspace::artifacts_namespace(job_id);

        for kind in ArtifactKind::ALL {
            let Some(source) = locate(output_dir, kind) else {
                log::debug!("Job {}: no {} produced", job_id, kind.as_str());
                continue;
            };
            let filename = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| kind.as_str().to_string());

            match self.storage.put_file(&namespace, &filename, &source) {
                Ok(stored) => {
                    result.artifacts.insert(kind, stored);
                }
                Err(e) => log::warn!(
                    "Job {}: partial result, could not store {}: {}",
                    job_id,
                    kind.as_str(),
                    e
                ),
            }
        }

        let combined = format!("{}\n{}", outcome.stdout, outcome.stderr);
        result.effort = measure_effort(&combined);
        result.log_path = log_path.map(Path::to_path_buf);

        log::info!(
            "Job {}: harvested {}/{} artifacts, {} task(s)",
            job_id,
            result.artifacts.len(),
            ArtifactKind::ALL.len(),
            result.effort.task_count
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::storage::FileStorage;

    const NEXTFLOW_OUTPUT: &str = "\
N E X T F L O W  ~  version 23.10.0
[4a/1b2c3d] Submitted process > NFCORE_AMPLISEQ:AMPLISEQ:FASTQC (sample1)
[5e/6f7a8b] Submitted process > NFCORE_AMPLISEQ:AMPLISEQ:CUTADAPT (sample1)
[9c/0d1e2f] Submitted process > NFCORE_AMPLISEQ:AMPLISEQ:DADA2_FILTNTRIM (A)
Completed at: 01-Jan-2026 10:00:00
Duration    : 1h 2m 3s
CPU hours   : 2.5
Succeeded   : 3
";

    #[test]
    fn test_parse_nextflow_duration() {
        assert_eq!(parse_nextflow_duration("1h 2m 3s"), Some(3723.0));
        assert_eq!(parse_nextflow_duration("45.5s"), Some(45.5));
        assert_eq!(parse_nextflow_duration("850ms"), Some(0.85));
        assert_eq!(parse_nextflow_duration("1d 1h"), Some(90000.0));
        assert_eq!(parse_nextflow_duration("unknown"), None);
    }

    #[test]
    fn test_measure_effort() {
        let effort = measure_effort(NEXTFLOW_OUTPUT);
        assert_eq!(effort.task_count, 3);
        assert_eq!(effort.reported_duration_secs, Some(3723.0));
    }

    #[test]
    fn test_measure_effort_is_deterministic() {
        assert_eq!(measure_effort(NEXTFLOW_OUTPUT), measure_effort(NEXTFLOW_OUTPUT));
        assert_eq!(measure_effort(""), ExecutionEffort::default());
    }

    fn write(path: &Path, content: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_locate_prefers_first_candidate() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("dada2/ASV_tax.silva_138_2.tsv"), b"generic");
        assert_eq!(
            locate(dir.path(), ArtifactKind::TaxonomyData),
            Some(dir.path().join("dada2/ASV_tax.silva_138_2.tsv"))
        );

        write(&dir.path().join("dada2/ASV_tax_species.silva_138_2.tsv"), b"species");
        assert_eq!(
            locate(dir.path(), ArtifactKind::TaxonomyData),
            Some(dir.path().join("dada2/ASV_tax_species.silva_138_2.tsv"))
        );
    }

    #[test]
    fn test_harvest_attaches_present_artifacts_only() {
        let data = tempfile::tempdir().unwrap();
        let output = data.path().join("jobs/j1/results");
        write(&output.join("summary_report/summary_report.html"), b"<html/>");
        write(&output.join("bacteria_composition_summary.tsv"), b"Rank\tGenus\n");

        let storage = Arc::new(FileStorage::new(data.path()));
        let harvester = ResultHarvester::new(storage.clone());
        let outcome = ProcessOutcome {
            exit_code: Some(0),
            stdout: NEXTFLOW_OUTPUT.to_string(),
            ..Default::default()
        };

        let result = harvester.harvest("j1", &output, &outcome, None);

        assert_eq!(result.artifacts.len(), 2);
        let report = result.artifact(ArtifactKind::ReportHtml).unwrap();
        assert!(report.starts_with(data.path().join("jobs/j1/artifacts")));
        assert_eq!(storage.get(report).unwrap(), b"<html/>");
        assert!(result.artifact(ArtifactKind::CompositionTable).is_some());
        assert!(result.artifact(ArtifactKind::AlphaDiversityPlot).is_none());
        assert_eq!(result.effort.task_count, 3);
    }

    #[test]
    fn test_harvest_with_no_artifacts_still_yields_result() {
        let data = tempfile::tempdir().unwrap();
        let harvester = ResultHarvester::new(Arc::new(FileStorage::new(data.path())));

        let log = data.path().join("pipeline.log");
        let result = harvester.harvest(
            "j1",
            &data.path().join("empty"),
            &ProcessOutcome::default(),
            Some(&log),
        );

        assert_eq!(result.job_id, "j1");
        assert!(result.artifacts.is_empty());
        assert_eq!(result.log_path, Some(log));
    }

    struct BrokenStore;

    impl BlobStore for BrokenStore {
        fn put(&self, namespace: &str, _: &str, _: &[u8]) -> Result<PathBuf, StorageError> {
            Err(StorageError::InvalidName(namespace.to_string()))
        }

        fn get(&self, path: &Path) -> Result<Vec<u8>, StorageError> {
            Err(StorageError::OutsideRoot(path.to_path_buf()))
        }

        fn exists(&self, _: &Path) -> bool {
            false
        }
    }

    #[test]
    fn test_storage_failure_is_not_fatal() {
        let data = tempfile::tempdir().unwrap();
        write(&data.path().join("plots/alpha_diversity.png"), b"png");

        let result = ResultHarvester::new(Arc::new(BrokenStore)).harvest(
            "j1",
            data.path(),
            &ProcessOutcome::default(),
            None,
        );
        assert!(result.artifacts.is_empty());
    }
}
