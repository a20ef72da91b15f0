//! Pipeline input manifest (`samplesheet.csv`).
//!
//! The manifest is a wire contract with nf-core/ampliseq: a comma separated
//! file with the header `sampleID,forwardReads,reverseReads,run`, absolute
//! read paths, and an empty reverse column for single-end data.

mod builder;

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::ManifestError;

pub use builder::{classify, ManifestBuilder};

pub const MANIFEST_HEADER: [&str; 4] = ["sampleID", "forwardReads", "reverseReads", "run"];

/// Which read of a pair a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mate {
    Forward,
    Reverse,
}

impl Mate {
    /// The marker names the builder looks for, for error messages.
    pub fn markers(&self) -> &'static str {
        match self {
            Mate::Forward => "_R1 or _1",
            Mate::Reverse => "_R2 or _2",
        }
    }
}

impl fmt::Display for Mate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mate::Forward => f.write_str("read 1"),
            Mate::Reverse => f.write_str("read 2"),
        }
    }
}

/// One sample line of the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRow {
    pub sample_id: String,
    pub forward_reads: PathBuf,
    pub reverse_reads: Option<PathBuf>,
    pub run: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub rows: Vec<ManifestRow>,
}

impl Manifest {
    /// Encodes the manifest exactly as it is written to disk.
    pub fn render(&self) -> Result<String, ManifestError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(MANIFEST_HEADER)?;
        for row in &self.rows {
            let reverse = row
                .reverse_reads
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            let forward = row.forward_reads.to_string_lossy().into_owned();
            writer.write_record([
                row.sample_id.as_str(),
                forward.as_str(),
                reverse.as_str(),
                row.run.as_str(),
            ])?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| ManifestError::Encode(e.into_error().into()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn write_to(&self, path: &Path) -> Result<(), ManifestError> {
        let content = self.render()?;
        std::fs::write(path, content).map_err(|e| ManifestError::Write {
            path: path.to_path_buf(),
            source: e,
        })
    }
}
