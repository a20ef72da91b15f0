//! Authoritative job state.
//!
//! The [`JobStore`] is the only component that writes job rows. Status
//! changes go through `mark_*` methods which apply a guarded transition in
//! a single statement, so a reader sees either the old or the new state.

mod job_store;

pub use job_store::{now, JobListFilter, JobStore};
