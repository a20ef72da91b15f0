//! Test harness for isolated end-to-end runs.
//!
//! The `TestHarness` struct provides:
//! - Temporary data, input and tool directories (`assert_fs` fixtures)
//! - A canned test dataset
//! - Fake `nextflow` and composition scripts written as shell scripts
//! - An `App` wired to those tools through the real process executor

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use assert_fs::fixture::ChildPath;
use assert_fs::prelude::*;
use assert_fs::TempDir;

use ampliseq_jobs::config::Config;
use ampliseq_jobs::pipeline::FixedMemory;
use ampliseq_jobs::{App, JobStatus, SubmitRequest, Upload};

use super::builders::ConfigBuilder;

/// Writes the expected artifacts, copies the manifest it was given into the
/// output directory and prints a Nextflow-like log.
pub const SUCCESSFUL_PIPELINE: &str = r#"#!/bin/sh
outdir=""
input=""
while [ $# -gt 0 ]; do
  case "$1" in
    --outdir) outdir="$2"; shift ;;
    --input) input="$2"; shift ;;
  esac
  shift
done
mkdir -p "$outdir/summary_report" "$outdir/plots"
echo "<html>report</html>" > "$outdir/summary_report/summary_report.html"
echo "png" > "$outdir/plots/alpha_diversity.png"
cp "$input" "$outdir/manifest_seen.csv"
echo "[a1/b2c3d4] Submitted process > NFCORE_AMPLISEQ:AMPLISEQ:FASTQC (sample1)"
echo "[e5/f6a7b8] Submitted process > NFCORE_AMPLISEQ:AMPLISEQ:DADA2_DENOISING (1)"
echo "[c9/d0e1f2] Submitted process > NFCORE_AMPLISEQ:AMPLISEQ:DADA2_TAXONOMY (1)"
echo "Completed at: 19-Oct-2026 10:00:00"
echo "Duration    : 1m 30s"
exit 0
"#;

pub const FAILING_PIPELINE: &str = r#"#!/bin/sh
echo "N E X T F L O W  ~  version 24.04.4"
echo "reference database not found" >&2
exit 1
"#;

pub const HANGING_PIPELINE: &str = r#"#!/bin/sh
exec sleep 30
"#;

/// Sleeps briefly so status polls can observe `processing`.
pub const SLOW_PIPELINE: &str = r#"#!/bin/sh
sleep 1
exit 0
"#;

/// Records its arguments so tests can inspect the invocation.
pub const ARGS_RECORDING_PIPELINE: &str = r#"#!/bin/sh
for arg in "$@"; do
  echo "$arg" >> "$(dirname "$0")/args.txt"
done
exit 0
"#;

pub const COMPOSITION_SCRIPT: &str = r#"#!/bin/sh
printf 'Rank\tGenus\tTotal_Reads\tsample1\n1\tBacteroides\t300\t300\n2\tPrevotella\t100\t100\n' \
  > "$1/bacteria_composition_summary.tsv"
echo "png" > "$1/bacteria_composition.png"
"#;

/// Test harness providing an isolated environment for integration tests.
pub struct TestHarness {
    temp_dir: TempDir,
    /// Root of the blob store and job workspaces.
    pub data_dir: PathBuf,
    /// Where fake tools are written.
    pub bin_dir: PathBuf,
    /// Canned test dataset.
    pub canned_dir: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");

        let bin = temp_dir.child("bin");
        bin.create_dir_all().expect("Failed to create bin dir");
        let canned = temp_dir.child("test_data");
        canned.create_dir_all().expect("Failed to create test data dir");
        canned
            .child("sample_R1.fastq.gz")
            .write_binary(b"canned forward")
            .expect("Failed to write canned file");
        canned
            .child("sample_R2.fastq.gz")
            .write_binary(b"canned reverse")
            .expect("Failed to write canned file");

        Self {
            data_dir: temp_dir.child("data").path().to_path_buf(),
            bin_dir: bin.path().to_path_buf(),
            canned_dir: canned.path().to_path_buf(),
            temp_dir,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write an executable script into the bin directory.
    #[cfg(unix)]
    pub fn write_script(&self, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = self.temp_dir.child("bin").child(name);
        script.write_str(body).expect("Failed to write script");
        std::fs::set_permissions(script.path(), std::fs::Permissions::from_mode(0o755))
            .expect("Failed to make script executable");
        script.path().to_path_buf()
    }

    /// Config builder with the harness directories filled in.
    pub fn config(&self) -> ConfigBuilder {
        ConfigBuilder::new(&self.data_dir).test_dataset(&self.canned_dir)
    }

    /// Start the service with a fixed, roomy host memory.
    pub fn start(&self, config: &Config) -> App {
        self.start_with_memory(config, 64)
    }

    pub fn start_with_memory(&self, config: &Config, memory_gb: u64) -> App {
        App::from_config(config, &FixedMemory::gb(memory_gb)).expect("Failed to start app")
    }

    /// A file inside the job's area, e.g. `results/manifest_seen.csv`.
    pub fn job_file(&self, job_id: &str, relative: &str) -> ChildPath {
        self.temp_dir
            .child("data")
            .child("jobs")
            .child(job_id)
            .child(relative)
    }

    /// Path of the job's pipeline output directory.
    pub fn output_dir(&self, job_id: &str) -> PathBuf {
        self.data_dir.join("jobs").join(job_id).join("results")
    }

    pub fn log_path(&self, job_id: &str) -> PathBuf {
        self.data_dir
            .join("jobs")
            .join(job_id)
            .join("logs")
            .join("pipeline.log")
    }

    /// Poll until the job is terminal, recording every distinct status seen.
    pub fn observe_until_terminal(&self, app: &App, job_id: &str) -> Vec<JobStatus> {
        let deadline = Instant::now() + Duration::from_secs(60);
        let mut seen: Vec<JobStatus> = Vec::new();
        loop {
            let status = app
                .service()
                .get_status(job_id)
                .expect("Failed to get status")
                .status;
            if seen.last() != Some(&status) {
                seen.push(status);
            }
            if status.is_terminal() {
                return seen;
            }
            assert!(Instant::now() < deadline, "job {} never finished", job_id);
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}

pub fn paired_request() -> SubmitRequest {
    SubmitRequest {
        project_name: "Gut survey".to_string(),
        email: "lab@example.org".to_string(),
        data_type: "paired-end".to_string(),
        send_email: true,
        use_test_dataset: false,
        // Reverse first: the manifest must not depend on upload order.
        files: vec![
            Upload::new("sample_R2.fastq.gz", vec![b'C'; 100]),
            Upload::new("sample_R1.fastq.gz", vec![b'A'; 100]),
        ],
    }
}

pub fn single_request() -> SubmitRequest {
    SubmitRequest {
        project_name: "Soil".to_string(),
        email: "lab@example.org".to_string(),
        data_type: "single-end".to_string(),
        send_email: false,
        use_test_dataset: false,
        files: vec![Upload::new("soil_R1.fastq.gz", b"ACGT".to_vec())],
    }
}

pub fn test_dataset_request(layout: &str) -> SubmitRequest {
    SubmitRequest {
        project_name: "Smoke test".to_string(),
        email: "lab@example.org".to_string(),
        data_type: layout.to_string(),
        send_email: false,
        use_test_dataset: true,
        files: Vec::new(),
    }
}
