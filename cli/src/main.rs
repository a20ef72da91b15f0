use std::path::{Path, PathBuf};

use ampliseq_jobs::{
    default_config_path, init_logging, load_config, App, JobListFilter, JobStatus, LogFormat,
    SubmitRequest, SystemMemoryProbe, Upload,
};
use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use serde::Serialize;

/// Submit and track nf-core/ampliseq analyses
#[derive(Parser, Debug)]
#[command(name = "ampliseq-jobs")]
#[command(version)]
#[command(about = "Submit and track nf-core/ampliseq microbiome analyses", long_about = None)]
struct Cli {
    /// Config file (defaults to <config dir>/ampliseq-jobs/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log line format
    #[arg(long, value_enum, default_value = "human")]
    log_format: LogFormatArg,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Human,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Human => LogFormat::Human,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a job and wait for its run to finish
    Submit {
        #[arg(short, long)]
        project: String,

        /// Contact address
        #[arg(short, long)]
        email: String,

        /// `single-end` or `paired-end`
        #[arg(short, long)]
        layout: String,

        /// Do not request a notification on completion
        #[arg(long, action)]
        no_email: bool,

        /// Run against the bundled test dataset instead of uploads
        #[arg(long, action)]
        test_dataset: bool,

        /// Sequencing files to upload
        files: Vec<PathBuf>,
    },
    /// Print the status of a job
    Status { job_id: String },
    /// Print a job with its input files and result
    Detail { job_id: String },
    /// Print the result of a completed job
    Results { job_id: String },
    /// Print the genus composition of a completed job
    Composition { job_id: String },
    /// List jobs, newest first
    List {
        #[arg(short, long)]
        status: Option<String>,

        #[arg(long, default_value_t = 100)]
        limit: u64,

        #[arg(long, default_value_t = 0)]
        offset: u64,
    },
    /// Fail interrupted jobs, run pending ones and wait for them
    Resume,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_upload(path: &Path) -> anyhow::Result<Upload> {
    let content =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("Not a file: {}", path.display()))?;
    Ok(Upload::new(file_name, content))
}

fn run(app: &App, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Submit {
            project,
            email,
            layout,
            no_email,
            test_dataset,
            files,
        } => {
            let uploads = files
                .iter()
                .map(|p| read_upload(p))
                .collect::<anyhow::Result<Vec<_>>>()?;

            let job = app.service().submit(SubmitRequest {
                project_name: project,
                email,
                data_type: layout,
                send_email: !no_email,
                use_test_dataset: test_dataset,
                files: uploads,
            })?;
            info!("Job {} submitted, waiting for the pipeline", job.job_id);

            let status = app.wait_for(&job.job_id)?;
            print_json(&status)?;
            if status.status == JobStatus::Failed {
                bail!("Job {} failed", job.job_id);
            }
        }
        Command::Status { job_id } => print_json(&app.service().get_status(&job_id)?)?,
        Command::Detail { job_id } => print_json(&app.service().get_detail(&job_id)?)?,
        Command::Results { job_id } => print_json(&app.service().get_results(&job_id)?)?,
        Command::Composition { job_id } => {
            print_json(&app.service().get_composition(&job_id)?)?
        }
        Command::List {
            status,
            limit,
            offset,
        } => {
            let status = status
                .map(|s| JobStatus::parse(&s).ok_or_else(|| anyhow!("Unknown status '{}'", s)))
                .transpose()?;
            let page = app.service().list_jobs(&JobListFilter {
                status,
                limit: Some(limit),
                offset: Some(offset),
            })?;
            print_json(&page)?;
        }
        Command::Resume => {
            let report = app.recover()?;
            info!(
                "{} interrupted job(s) failed, {} pending job(s) queued",
                report.interrupted, report.requeued
            );
            app.wait_until_idle();
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format.into());

    let config_path = cli
        .config
        .or_else(default_config_path)
        .ok_or_else(|| anyhow!("No config file given and no config directory found"))?;
    let config = load_config(&config_path)
        .with_context(|| format!("Loading {}", config_path.display()))?;

    let app = App::from_config(&config, &SystemMemoryProbe)?;
    let outcome = run(&app, cli.command);
    app.shutdown();
    outcome
}
