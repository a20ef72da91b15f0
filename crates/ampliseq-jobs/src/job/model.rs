use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::{JobStatus, SequencingLayout};

/// One end-to-end request to run the analysis pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub job_id: String,
    pub project_name: String,
    pub email: String,
    pub data_type: SequencingLayout,
    pub send_email: bool,
    pub is_test_data: bool,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set only once the job reaches `completed`.
    pub completed_at: Option<DateTime<Utc>>,
    /// Set only once the job reaches `failed`.
    pub error_message: Option<String>,
}

impl Job {
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            job_id: self.job_id.clone(),
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
            error_message: self.error_message.clone(),
        }
    }
}

/// An uploaded (or canned) sequencing file owned by a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputFile {
    pub id: i64,
    pub job_id: String,
    pub file_name: String,
    pub file_size: u64,
    /// Where the blob store keeps the content.
    pub storage_path: PathBuf,
    pub uploaded_at: DateTime<Utc>,
}

/// Named output artifacts the harvester knows how to find.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    ReportHtml,
    AlphaDiversityPlot,
    BetaDiversityPlot,
    TaxonomyPlot,
    AlphaDiversityData,
    BetaDiversityData,
    TaxonomyData,
    CompositionPlot,
    CompositionTable,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 9] = [
        ArtifactKind::ReportHtml,
        ArtifactKind::AlphaDiversityPlot,
        ArtifactKind::BetaDiversityPlot,
        ArtifactKind::TaxonomyPlot,
        ArtifactKind::AlphaDiversityData,
        ArtifactKind::BetaDiversityData,
        ArtifactKind::TaxonomyData,
        ArtifactKind::CompositionPlot,
        ArtifactKind::CompositionTable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::ReportHtml => "report_html",
            ArtifactKind::AlphaDiversityPlot => "alpha_diversity_plot",
            ArtifactKind::BetaDiversityPlot => "beta_diversity_plot",
            ArtifactKind::TaxonomyPlot => "taxonomy_plot",
            ArtifactKind::AlphaDiversityData => "alpha_diversity_data",
            ArtifactKind::BetaDiversityData => "beta_diversity_data",
            ArtifactKind::TaxonomyData => "taxonomy_data",
            ArtifactKind::CompositionPlot => "composition_plot",
            ArtifactKind::CompositionTable => "composition_table",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }

    /// Paths relative to the pipeline output directory, most specific first.
    pub fn candidates(&self) -> &'static [&'static str] {
        match self {
            ArtifactKind::ReportHtml => &["summary_report/summary_report.html"],
            ArtifactKind::AlphaDiversityPlot => &["plots/alpha_diversity.png"],
            ArtifactKind::BetaDiversityPlot => &["plots/beta_diversity.png"],
            ArtifactKind::TaxonomyPlot => &["plots/taxonomy_barplot.png"],
            ArtifactKind::AlphaDiversityData => {
                &["qiime2/diversity/alpha_diversity/shannon_vector.tsv"]
            }
            ArtifactKind::BetaDiversityData => {
                &["qiime2/diversity/beta_diversity/bray_curtis_distance_matrix.tsv"]
            }
            ArtifactKind::TaxonomyData => &[
                "dada2/ASV_tax_species.silva_138_2.tsv",
                "dada2/ASV_tax.silva_138_2.tsv",
            ],
            ArtifactKind::CompositionPlot => &["bacteria_composition.png"],
            ArtifactKind::CompositionTable => &["bacteria_composition_summary.tsv"],
        }
    }
}

/// How much work the pipeline did, derived from its captured output.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionEffort {
    /// Number of pipeline tasks Nextflow reported as submitted.
    pub task_count: u32,
    /// Wall-clock duration from Nextflow's completion summary, if printed.
    pub reported_duration_secs: Option<f64>,
}

/// Output of a successful run. Artifacts are individually optional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub job_id: String,
    pub artifacts: BTreeMap<ArtifactKind, PathBuf>,
    pub effort: ExecutionEffort,
    /// Raw pipeline log, kept for diagnostics and never surfaced in status.
    #[serde(skip_serializing)]
    pub log_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn new(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            artifacts: BTreeMap::new(),
            effort: ExecutionEffort::default(),
            log_path: None,
            created_at: Utc::now(),
        }
    }

    pub fn artifact(&self, kind: ArtifactKind) -> Option<&Path> {
        self.artifacts.get(&kind).map(PathBuf::as_path)
    }
}

/// What a status poll returns.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Full job record with its inputs and, once present, its result.
#[derive(Debug, Clone, Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub job: Job,
    pub files: Vec<InputFile>,
    pub result: Option<AnalysisResult>,
}

/// A page of jobs, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub total: u64,
}
