//! Deterministic construction of external process invocations.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::PipelineConfig;
use crate::job::SequencingLayout;

use super::profile::ResourceProfile;

/// A fully resolved command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Value following `flag`, if present.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }
}

impl fmt::Display for ProcessSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Builds the Nextflow command line for one run.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    config: PipelineConfig,
}

impl CommandBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn build(
        &self,
        manifest: &Path,
        output_dir: &Path,
        layout: SequencingLayout,
        profile: &ResourceProfile,
        working_dir: &Path,
    ) -> ProcessSpec {
        let config = &self.config;
        let mut spec = ProcessSpec::new(&config.program)
            .args(["run", config.pipeline.as_str()])
            .args(["-r", config.revision.as_str()])
            .args(["-profile", config.container_profile.as_str()]);

        if let Some(overlay) = profile.low_memory.as_ref().and_then(|o| o.config.as_ref()) {
            spec = spec.arg("-c").arg(overlay.to_string_lossy());
        }
        if config.resume {
            spec = spec.arg("-resume");
        }

        spec = spec
            .arg("--input")
            .arg(manifest.to_string_lossy())
            .arg("--outdir")
            .arg(output_dir.to_string_lossy())
            .args(["--FW_primer", config.forward_primer.as_str()])
            .args(["--RV_primer", config.reverse_primer.as_str()])
            .args(["--dada_ref_taxonomy", config.reference_taxonomy.as_str()])
            .arg("--max_cpus")
            .arg(profile.limits.max_cpus.to_string())
            .arg("--max_memory")
            .arg(format!("{}.GB", profile.limits.max_memory_gb));

        if layout == SequencingLayout::SingleEnd {
            spec = spec.arg("--single_end");
        }

        spec.args(profile.skip_flags.iter().cloned())
            .current_dir(working_dir)
    }
}
