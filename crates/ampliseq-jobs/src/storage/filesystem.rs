use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use super::BlobStore;
use crate::error::StorageError;

/// Blob store rooted at a local directory.
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deletes everything stored under `namespace`. Missing is fine.
    pub fn remove_namespace(&self, namespace: &str) -> Result<(), StorageError> {
        let dir = self.namespace_dir(namespace)?;
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Remove {
                path: dir,
                source: e,
            }),
        }
    }

    fn namespace_dir(&self, namespace: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(namespace);
        let valid = !namespace.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StorageError::InvalidName(namespace.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }

    fn check_inside_root(&self, path: &Path) -> Result<(), StorageError> {
        let escapes = path
            .components()
            .any(|c| matches!(c, Component::ParentDir));
        if escapes || !path.starts_with(&self.root) {
            return Err(StorageError::OutsideRoot(path.to_path_buf()));
        }
        Ok(())
    }

    /// Creates a new empty file named `filename` (or `base_N.ext`) in `dir`.
    ///
    /// `create_new` makes the existence check and the creation one step, so
    /// two writers never share a path.
    fn create_exclusive(&self, dir: &Path, filename: &str) -> Result<(PathBuf, File), StorageError> {
        // Split on the first dot so `reads.fastq.gz` numbers as `reads_2.fastq.gz`.
        let (base, ext) = match filename.find('.') {
            Some(dot_pos) if dot_pos > 0 => (&filename[..dot_pos], Some(&filename[dot_pos..])),
            _ => (filename, None),
        };

        for counter in 1..=1000 {
            let try_filename = if counter == 1 {
                filename.to_string()
            } else {
                match ext {
                    Some(ext) => format!("{}_{}{}", base, counter, ext),
                    None => format!("{}_{}", base, counter),
                }
            };

            let try_path = dir.join(&try_filename);
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&try_path)
            {
                Ok(file) => return Ok((try_path, file)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(StorageError::WriteFile {
                        path: try_path,
                        source: e,
                    })
                }
            }
        }

        Err(StorageError::NameExhausted(dir.join(filename)))
    }

    fn reserve(&self, namespace: &str, filename: &str) -> Result<(PathBuf, File), StorageError> {
        let name = sanitize_file_name(filename)?;
        let dir = self.namespace_dir(namespace)?;
        self.ensure_directory(&dir)?;
        self.create_exclusive(&dir, &name)
    }
}

/// Keeps only the final path component of a client-supplied name.
fn sanitize_file_name(filename: &str) -> Result<String, StorageError> {
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if name.is_empty() || name == "." || name == ".." || name.contains('\0') {
        return Err(StorageError::InvalidName(filename.to_string()));
    }
    Ok(name.to_string())
}

impl BlobStore for FileStorage {
    fn put(
        &self,
        namespace: &str,
        filename: &str,
        content: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let (path, mut file) = self.reserve(namespace, filename)?;
        file.write_all(content)
            .map_err(|e| StorageError::WriteFile {
                path: path.clone(),
                source: e,
            })?;
        Ok(path)
    }

    fn get(&self, path: &Path) -> Result<Vec<u8>, StorageError> {
        self.check_inside_root(path)?;
        std::fs::read(path).map_err(|e| StorageError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })
    }

    fn exists(&self, path: &Path) -> bool {
        self.check_inside_root(path).is_ok() && path.is_file()
    }

    fn put_file(
        &self,
        namespace: &str,
        filename: &str,
        source: &Path,
    ) -> Result<PathBuf, StorageError> {
        let mut input = File::open(source).map_err(|e| StorageError::ReadFile {
            path: source.to_path_buf(),
            source: e,
        })?;
        let (path, mut file) = self.reserve(namespace, filename)?;
        std::io::copy(&mut input, &mut file).map_err(|e| StorageError::WriteFile {
            path: path.clone(),
            source: e,
        })?;
        Ok(path)
    }
}
