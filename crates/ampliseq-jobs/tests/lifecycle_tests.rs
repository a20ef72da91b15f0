//! End-to-end job lifecycle tests against fake pipeline tools.
//!
//! Each test writes shell scripts standing in for `nextflow` and the
//! composition summarizer, starts the real service wiring and drives a job
//! from submission to a terminal state.

#![cfg(unix)]

mod common;

use ampliseq_jobs::{ArtifactKind, JobListFilter, JobStatus, JobsError, QueryError};
use assert_fs::prelude::*;
use serial_test::serial;

use common::harness::{
    paired_request, single_request, test_dataset_request, ARGS_RECORDING_PIPELINE,
    COMPOSITION_SCRIPT, FAILING_PIPELINE, HANGING_PIPELINE, SLOW_PIPELINE, SUCCESSFUL_PIPELINE,
};
use common::TestHarness;

fn assert_monotonic(seen: &[JobStatus]) {
    let order = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];
    let rank = |s: &JobStatus| order.iter().position(|o| o == s).unwrap_or(usize::MAX);
    for pair in seen.windows(2) {
        assert!(
            rank(&pair[0]) < rank(&pair[1]),
            "status went backwards: {:?}",
            seen
        );
    }
    assert!(
        !seen.contains(&JobStatus::Completed) || !seen.contains(&JobStatus::Failed),
        "both terminal states observed: {:?}",
        seen
    );
}

#[test]
#[serial]
fn test_paired_end_run_completes_with_artifacts() {
    let h = TestHarness::new();
    let nextflow = h.write_script("nextflow", SUCCESSFUL_PIPELINE);
    let config = h.config().pipeline_program(&nextflow).build();
    let app = h.start(&config);

    let job = app.service().submit(paired_request()).unwrap();
    assert_eq!(job.status, JobStatus::Pending);

    let seen = h.observe_until_terminal(&app, &job.job_id);
    assert_monotonic(&seen);
    assert_eq!(seen.last(), Some(&JobStatus::Completed));

    let status = app.service().get_status(&job.job_id).unwrap();
    assert!(status.completed_at.is_some());
    assert!(status.error_message.is_none());

    // The pipeline saw both mates on one row, forward first.
    let uploads = h.data_dir.join("jobs").join(&job.job_id).join("uploads");
    h.job_file(&job.job_id, "results/manifest_seen.csv")
        .assert(format!(
            "sampleID,forwardReads,reverseReads,run\nsample1,{},{},A\n",
            uploads.join("sample_R1.fastq.gz").display(),
            uploads.join("sample_R2.fastq.gz").display()
        ));

    let result = app.service().get_results(&job.job_id).unwrap();
    assert!(result.artifact(ArtifactKind::ReportHtml).is_some());
    assert!(result.artifact(ArtifactKind::AlphaDiversityPlot).is_some());
    assert!(result.artifact(ArtifactKind::BetaDiversityPlot).is_none());
    assert_eq!(result.effort.task_count, 3);
    assert_eq!(result.effort.reported_duration_secs, Some(90.0));

    h.job_file(&job.job_id, "results/summary_report/summary_report.html")
        .assert("<html>report</html>\n");

    let log = std::fs::read_to_string(h.log_path(&job.job_id)).unwrap();
    assert!(log.contains("Submitted process >"));

    app.shutdown();
}

#[test]
#[serial]
fn test_nonzero_exit_fails_with_stderr_cause() {
    let h = TestHarness::new();
    let nextflow = h.write_script("nextflow", FAILING_PIPELINE);
    let config = h.config().pipeline_program(&nextflow).build();
    let app = h.start(&config);

    let job = app.service().submit(single_request()).unwrap();
    let status = app.wait_for(&job.job_id).unwrap();

    assert_eq!(status.status, JobStatus::Failed);
    assert!(status.completed_at.is_none());
    let message = status.error_message.unwrap();
    assert!(
        message.starts_with("Nextflow error: reference database not found"),
        "unexpected cause: {}",
        message
    );

    // The full output is kept on disk, not in the status.
    let log = std::fs::read_to_string(h.log_path(&job.job_id)).unwrap();
    assert!(log.contains("N E X T F L O W"));
    assert!(!message.contains("N E X T F L O W"));

    let err = app.service().get_results(&job.job_id).unwrap_err();
    assert!(matches!(
        err,
        JobsError::Query(QueryError::InvalidState {
            actual: JobStatus::Failed,
            ..
        })
    ));

    app.shutdown();
}

#[test]
#[serial]
fn test_run_past_time_budget_fails_with_timeout_cause() {
    let h = TestHarness::new();
    let nextflow = h.write_script("nextflow", HANGING_PIPELINE);
    let config = h
        .config()
        .pipeline_program(&nextflow)
        .timeout_secs(1)
        .build();
    let app = h.start(&config);

    let job = app.service().submit(single_request()).unwrap();
    let status = app.wait_for(&job.job_id).unwrap();

    assert_eq!(status.status, JobStatus::Failed);
    assert_eq!(
        status.error_message.as_deref(),
        Some("Pipeline timed out after 1 seconds")
    );

    app.shutdown();
}

#[test]
#[serial]
fn test_missing_mate_fails_before_launch() {
    let h = TestHarness::new();
    let nextflow = h.write_script("nextflow", ARGS_RECORDING_PIPELINE);
    let config = h.config().pipeline_program(&nextflow).build();
    let app = h.start(&config);

    let mut request = paired_request();
    request.files.retain(|f| f.file_name.contains("_R1"));
    let job = app.service().submit(request).unwrap();
    let status = app.wait_for(&job.job_id).unwrap();

    assert_eq!(status.status, JobStatus::Failed);
    assert!(status
        .error_message
        .unwrap()
        .starts_with("Manifest error: No read 2 file found"));
    assert!(!h.bin_dir.join("args.txt").exists());

    app.shutdown();
}

#[test]
#[serial]
fn test_missing_pipeline_program_fails_job() {
    let h = TestHarness::new();
    let config = h
        .config()
        .pipeline_program(&h.bin_dir.join("no-such-nextflow"))
        .build();
    let app = h.start(&config);

    let job = app.service().submit(single_request()).unwrap();
    let status = app.wait_for(&job.job_id).unwrap();

    assert_eq!(status.status, JobStatus::Failed);
    assert!(status
        .error_message
        .unwrap()
        .starts_with("Failed to launch pipeline"));

    app.shutdown();
}

#[test]
#[serial]
fn test_statuses_are_observed_in_order() {
    let h = TestHarness::new();
    let nextflow = h.write_script("nextflow", SLOW_PIPELINE);
    let config = h.config().pipeline_program(&nextflow).build();
    let app = h.start(&config);

    let job = app.service().submit(single_request()).unwrap();
    let seen = h.observe_until_terminal(&app, &job.job_id);

    assert_monotonic(&seen);
    assert!(seen.contains(&JobStatus::Processing), "{:?}", seen);
    assert_eq!(seen.last(), Some(&JobStatus::Completed));

    // Results are not visible while the job is still running.
    let second = app.service().submit(single_request()).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(300));
    let err = app.service().get_results(&second.job_id).unwrap_err();
    assert!(matches!(
        err,
        JobsError::Query(QueryError::InvalidState { .. })
    ));
    app.wait_for(&second.job_id).unwrap();

    app.shutdown();
}

#[test]
#[serial]
fn test_composition_is_available_when_summarizer_runs() {
    let h = TestHarness::new();
    let nextflow = h.write_script("nextflow", SUCCESSFUL_PIPELINE);
    let script = h.write_script("bacteria_composition.sh", COMPOSITION_SCRIPT);
    let config = h
        .config()
        .pipeline_program(&nextflow)
        .composition_script(&script)
        .build();
    let app = h.start(&config);

    let job = app.service().submit(paired_request()).unwrap();
    assert_eq!(
        app.wait_for(&job.job_id).unwrap().status,
        JobStatus::Completed
    );

    let result = app.service().get_results(&job.job_id).unwrap();
    assert!(result.artifact(ArtifactKind::CompositionPlot).is_some());

    let summary = app.service().get_composition(&job.job_id).unwrap();
    assert_eq!(summary.total_reads, 400);
    assert_eq!(summary.genera.len(), 2);
    assert_eq!(summary.genera[0].genus, "Bacteroides");
    assert!((summary.genera[0].share - 0.75).abs() < 1e-9);

    app.shutdown();
}

#[test]
#[serial]
fn test_composition_is_not_found_without_summarizer() {
    let h = TestHarness::new();
    let nextflow = h.write_script("nextflow", SUCCESSFUL_PIPELINE);
    let config = h.config().pipeline_program(&nextflow).build();
    let app = h.start(&config);

    let job = app.service().submit(paired_request()).unwrap();
    assert_eq!(
        app.wait_for(&job.job_id).unwrap().status,
        JobStatus::Completed
    );

    let result = app.service().get_results(&job.job_id).unwrap();
    assert!(result.artifact(ArtifactKind::CompositionTable).is_none());

    let err = app.service().get_composition(&job.job_id).unwrap_err();
    assert!(matches!(
        err,
        JobsError::Query(QueryError::NotFound {
            resource: "Composition data",
            ..
        })
    ));

    app.shutdown();
}

#[test]
#[serial]
fn test_dataset_job_runs_reduced_profile() {
    let h = TestHarness::new();
    let nextflow = h.write_script("nextflow", ARGS_RECORDING_PIPELINE);
    let config = h.config().pipeline_program(&nextflow).build();
    let app = h.start(&config);

    let job = app
        .service()
        .submit(test_dataset_request("paired-end"))
        .unwrap();
    assert!(job.is_test_data);
    assert_eq!(
        app.wait_for(&job.job_id).unwrap().status,
        JobStatus::Completed
    );

    let args = std::fs::read_to_string(h.bin_dir.join("args.txt")).unwrap();
    let args: Vec<&str> = args.lines().collect();
    for flag in &config.resources.reduced_skip_flags {
        assert!(args.contains(&flag.as_str()), "missing {}", flag);
    }
    let cpus = args
        .iter()
        .position(|a| *a == "--max_cpus")
        .map(|i| args[i + 1])
        .unwrap();
    assert_eq!(cpus, config.resources.reduced.max_cpus.to_string());
    assert!(!args.contains(&"--single_end"));

    let detail = app.service().get_detail(&job.job_id).unwrap();
    let names: Vec<&str> = detail.files.iter().map(|f| f.file_name.as_str()).collect();
    assert_eq!(names, vec!["sample_R1.fastq.gz", "sample_R2.fastq.gz"]);

    app.shutdown();
}

#[test]
#[serial]
fn test_low_memory_host_gets_config_overlay() {
    let h = TestHarness::new();
    let nextflow = h.write_script("nextflow", ARGS_RECORDING_PIPELINE);
    let overlay = h.temp_path().join("low_memory.config");
    std::fs::write(&overlay, "process.memory = '4 GB'\n").unwrap();
    let config = h
        .config()
        .pipeline_program(&nextflow)
        .low_memory(8.0, Some(&overlay))
        .build();
    let app = h.start_with_memory(&config, 4);

    let job = app.service().submit(single_request()).unwrap();
    assert_eq!(
        app.wait_for(&job.job_id).unwrap().status,
        JobStatus::Completed
    );

    let args = std::fs::read_to_string(h.bin_dir.join("args.txt")).unwrap();
    let args: Vec<&str> = args.lines().collect();
    let c = args.iter().position(|a| *a == "-c").unwrap();
    assert_eq!(args[c + 1], overlay.to_string_lossy());
    assert!(args.contains(&"4.GB"));
    assert!(args.contains(&"--single_end"));

    app.shutdown();
}

#[test]
#[serial]
fn test_invalid_submission_never_creates_a_job() {
    let h = TestHarness::new();
    let nextflow = h.write_script("nextflow", SUCCESSFUL_PIPELINE);
    let config = h.config().pipeline_program(&nextflow).build();
    let app = h.start(&config);

    let mut request = single_request();
    request.files.clear();
    let err = app.service().submit(request).unwrap_err();
    assert!(matches!(err, JobsError::Validation(_)));

    let mut request = single_request();
    request.email = "nobody".to_string();
    assert!(app.service().submit(request).is_err());

    let page = app.service().list_jobs(&JobListFilter::default()).unwrap();
    assert_eq!(page.total, 0);

    app.shutdown();
}

#[test]
#[serial]
fn test_jobs_survive_a_restart() {
    let h = TestHarness::new();
    let nextflow = h.write_script("nextflow", SUCCESSFUL_PIPELINE);
    let config = h.config().pipeline_program(&nextflow).build();

    let app = h.start(&config);
    let job = app.service().submit(paired_request()).unwrap();
    app.wait_for(&job.job_id).unwrap();
    app.shutdown();

    let app = h.start(&config);
    assert_eq!(app.recover().unwrap().requeued, 0);
    let status = app.service().get_status(&job.job_id).unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert!(app.service().get_results(&job.job_id).is_ok());
    app.shutdown();
}
