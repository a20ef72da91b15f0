//! Resource profile selection.
//!
//! The profile depends on two inputs: the job's run mode and the host's
//! memory. The host side is an injected [`EnvironmentCapability`] probed
//! once at startup, so selection itself is a pure function.

use std::path::PathBuf;

use sysinfo::System;

use crate::config::{ResourceLimits, ResourcesConfig};
use crate::job::Job;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Whether a job runs against the canned test dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Real user data: full resources, every stage.
    Full,
    /// Test dataset: reduced resources, optional stages skipped.
    Reduced,
}

impl RunMode {
    pub fn for_job(job: &Job) -> Self {
        if job.is_test_data {
            RunMode::Reduced
        } else {
            RunMode::Full
        }
    }
}

/// What the execution host offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvironmentCapability {
    pub total_memory_bytes: u64,
}

impl EnvironmentCapability {
    pub fn total_memory_gb(&self) -> f64 {
        self.total_memory_bytes as f64 / BYTES_PER_GB
    }
}

/// Source of the host's [`EnvironmentCapability`].
pub trait MemoryProbe: Send + Sync {
    fn capability(&self) -> EnvironmentCapability;
}

/// Reads total physical memory from the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemoryProbe;

impl MemoryProbe for SystemMemoryProbe {
    fn capability(&self) -> EnvironmentCapability {
        let mut system = System::new();
        system.refresh_memory();
        EnvironmentCapability {
            total_memory_bytes: system.total_memory(),
        }
    }
}

/// A probe that always reports the same amount of memory.
#[derive(Debug, Clone, Copy)]
pub struct FixedMemory(pub u64);

impl FixedMemory {
    pub fn gb(gigabytes: u64) -> Self {
        Self(gigabytes * 1024 * 1024 * 1024)
    }
}

impl MemoryProbe for FixedMemory {
    fn capability(&self) -> EnvironmentCapability {
        EnvironmentCapability {
            total_memory_bytes: self.0,
        }
    }
}

/// Extra limits applied on hosts with little memory.
#[derive(Debug, Clone, PartialEq)]
pub struct LowMemoryOverlay {
    /// Nextflow config passed with `-c`, when one is configured.
    pub config: Option<PathBuf>,
    pub host_memory_gb: f64,
}

/// Resources and stage flags for one pipeline invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceProfile {
    pub mode: RunMode,
    pub limits: ResourceLimits,
    pub skip_flags: Vec<String>,
    pub low_memory: Option<LowMemoryOverlay>,
}

#[derive(Debug, Clone)]
pub struct ProfileSelector {
    resources: ResourcesConfig,
    capability: EnvironmentCapability,
}

impl ProfileSelector {
    pub fn new(resources: ResourcesConfig, capability: EnvironmentCapability) -> Self {
        Self {
            resources,
            capability,
        }
    }

    pub fn capability(&self) -> EnvironmentCapability {
        self.capability
    }

    pub fn select(&self, mode: RunMode) -> ResourceProfile {
        let (mut limits, skip_flags) = match mode {
            RunMode::Full => (self.resources.full, Vec::new()),
            RunMode::Reduced => (
                self.resources.reduced,
                self.resources.reduced_skip_flags.clone(),
            ),
        };

        let host_gb = self.capability.total_memory_gb();
        let low_memory = if host_gb < self.resources.low_memory_threshold_gb {
            // Never ask for more memory than the host has.
            let host_ceiling = (host_gb.floor() as u32).max(1);
            limits.max_memory_gb = limits.max_memory_gb.min(host_ceiling);
            Some(LowMemoryOverlay {
                config: self.resources.low_memory_config.clone(),
                host_memory_gb: host_gb,
            })
        } else {
            None
        };

        ResourceProfile {
            mode,
            limits,
            skip_flags,
            low_memory,
        }
    }
}
