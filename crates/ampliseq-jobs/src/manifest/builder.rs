use std::path::PathBuf;

use super::{Manifest, ManifestRow, Mate};
use crate::error::ManifestError;
use crate::job::{InputFile, SequencingLayout};

/// Decides which mate a file name carries, if any.
///
/// Names are split on `_` and `.`; the first token is the sample name and
/// never counts. `R1`/`R2` tokens take priority over bare `1`/`2` tokens, so
/// `run_1_R2.fastq.gz` is a read 2 file. A name carrying both mates is not
/// a candidate for either.
pub fn classify(file_name: &str) -> Option<Mate> {
    let tokens: Vec<&str> = file_name.split(['_', '.']).skip(1).collect();

    let pick = |forward: &str, reverse: &str| -> Option<Option<Mate>> {
        let has_forward = tokens.iter().any(|t| *t == forward);
        let has_reverse = tokens.iter().any(|t| *t == reverse);
        match (has_forward, has_reverse) {
            (false, false) => None,
            (true, false) => Some(Some(Mate::Forward)),
            (false, true) => Some(Some(Mate::Reverse)),
            (true, true) => Some(None),
        }
    };

    pick("R1", "R2").or_else(|| pick("1", "2")).flatten()
}

/// Turns a job's input files into its manifest.
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    sample_id: String,
    run: String,
}

impl Default for ManifestBuilder {
    fn default() -> Self {
        Self {
            sample_id: "sample1".to_string(),
            run: "A".to_string(),
        }
    }
}

impl ManifestBuilder {
    pub fn new(sample_id: impl Into<String>, run: impl Into<String>) -> Self {
        Self {
            sample_id: sample_id.into(),
            run: run.into(),
        }
    }

    pub fn build(
        &self,
        files: &[InputFile],
        layout: SequencingLayout,
    ) -> Result<Manifest, ManifestError> {
        if files.is_empty() {
            return Err(ManifestError::NoInputFiles);
        }

        let (forward, reverse) = match layout {
            SequencingLayout::SingleEnd => {
                if files.len() > 1 {
                    return Err(ManifestError::TooManyInputs { count: files.len() });
                }
                (&files[0], None)
            }
            SequencingLayout::PairedEnd => {
                let (forward, reverse) = pair_files(files)?;
                (forward, Some(reverse))
            }
        };

        Ok(Manifest {
            rows: vec![ManifestRow {
                sample_id: self.sample_id.clone(),
                forward_reads: absolute(forward)?,
                reverse_reads: reverse.map(absolute).transpose()?,
                run: self.run.clone(),
            }],
        })
    }
}

fn absolute(file: &InputFile) -> Result<PathBuf, ManifestError> {
    std::path::absolute(&file.storage_path).map_err(|e| ManifestError::InvalidPath {
        path: file.storage_path.clone(),
        source: e,
    })
}

fn pair_files(files: &[InputFile]) -> Result<(&InputFile, &InputFile), ManifestError> {
    let mut forward = Vec::new();
    let mut reverse = Vec::new();

    for file in files {
        match classify(&file.file_name) {
            Some(Mate::Forward) => forward.push(file),
            Some(Mate::Reverse) => reverse.push(file),
            None => log::warn!(
                "Ignoring '{}' for job {}: no read 1/read 2 marker",
                file.file_name,
                file.job_id
            ),
        }
    }

    Ok((single(forward, Mate::Forward)?, single(reverse, Mate::Reverse)?))
}

fn single(candidates: Vec<&InputFile>, mate: Mate) -> Result<&InputFile, ManifestError> {
    match candidates.as_slice() {
        [] => Err(ManifestError::MissingMate {
            mate,
            marker: mate.markers(),
        }),
        [file] => Ok(*file),
        many => {
            let mut names: Vec<String> = many.iter().map(|f| f.file_name.clone()).collect();
            names.sort();
            Err(ManifestError::AmbiguousMate {
                mate,
                candidates: names,
            })
        }
    }
}
