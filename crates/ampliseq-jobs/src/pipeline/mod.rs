pub mod batch;
pub mod command;
pub mod composition;
pub mod executor;
pub mod harvester;
pub mod profile;
pub mod supervisor;

pub use batch::{
    AwsBatchClient, BatchClient, BatchExecutor, BatchJobState, BatchPhase, BatchSubmission,
};
pub use command::{CommandBuilder, ProcessSpec};
pub use composition::{
    parse_composition_table, CompositionError, CompositionSummarizer, CompositionSummary,
    GenusAbundance,
};
pub use executor::{LocalProcessExecutor, PipelineExecutor, ProcessOutcome};
pub use harvester::{measure_effort, ResultHarvester};
pub use profile::{
    EnvironmentCapability, FixedMemory, MemoryProbe, ProfileSelector, ResourceProfile, RunMode,
    SystemMemoryProbe,
};
pub use supervisor::Supervisor;
