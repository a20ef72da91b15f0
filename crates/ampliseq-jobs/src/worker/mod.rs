pub mod pool;

pub use pool::{Dispatcher, RunReport, WorkerPool};

// Re-export crossbeam_channel for callers that select on reports
pub use crossbeam_channel;
