pub mod model;
pub mod status;

pub use model::{
    AnalysisResult, ArtifactKind, ExecutionEffort, InputFile, Job, JobDetail, JobPage,
    StatusSnapshot,
};
pub use status::{JobStatus, SequencingLayout};
