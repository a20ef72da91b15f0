pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod job;
pub mod manifest;
pub mod pipeline;
pub mod sanitize;
pub mod service;
pub mod storage;
pub mod store;
pub mod telemetry;
pub mod worker;

pub use app::{App, RecoveryReport};
pub use config::{default_config_path, load_config, load_config_from_str, Config};
pub use error::{
    ConfigError, DispatchError, ExecutionError, FieldError, JobsError, ManifestError, QueryError,
    Result, StorageError, ValidationErrors,
};
pub use job::{
    AnalysisResult, ArtifactKind, InputFile, Job, JobDetail, JobPage, JobStatus, SequencingLayout,
    StatusSnapshot,
};
pub use pipeline::{
    CompositionSummary, LocalProcessExecutor, MemoryProbe, PipelineExecutor, Supervisor,
    SystemMemoryProbe,
};
pub use service::{JobService, SubmitRequest, Upload};
pub use storage::{BlobStore, FileStorage};
pub use store::{JobListFilter, JobStore};
pub use telemetry::{init_logging, LogFormat};
pub use worker::{Dispatcher, RunReport, WorkerPool};
